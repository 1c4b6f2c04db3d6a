//! Pinning training workers to CPU cores.

/// This represents a CPU core.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId {
    pub id: usize,
}

#[cfg(target_os = "linux")]
mod imp {
    use super::CoreId;
    use libc::{cpu_set_t, sched_getaffinity, sched_setaffinity, CPU_ISSET, CPU_SET, CPU_SETSIZE};
    use std::mem;

    /// Cores the current thread is allowed to run on.
    pub fn get_core_ids() -> Option<Vec<CoreId>> {
        let full_set = get_affinity_mask()?;
        Some(
            (0..CPU_SETSIZE as usize)
                .filter(|&i| unsafe { CPU_ISSET(i, &full_set) })
                .map(|id| CoreId { id })
                .collect(),
        )
    }

    pub fn set_for_current(core_id: CoreId) -> bool {
        let mut set = new_cpu_set();
        unsafe { CPU_SET(core_id.id, &mut set) };

        // pid 0 is the calling thread
        let res = unsafe { sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &set) };
        res == 0
    }

    fn get_affinity_mask() -> Option<cpu_set_t> {
        let mut set = new_cpu_set();
        let result = unsafe { sched_getaffinity(0, mem::size_of::<cpu_set_t>(), &mut set) };
        (result == 0).then_some(set)
    }

    fn new_cpu_set() -> cpu_set_t {
        unsafe { mem::zeroed::<cpu_set_t>() }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::CoreId;

    pub fn get_core_ids() -> Option<Vec<CoreId>> {
        None
    }

    pub fn set_for_current(_core_id: CoreId) -> bool {
        false
    }
}

pub use imp::{get_core_ids, set_for_current};

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_get_core_ids() {
        let cores = get_core_ids().unwrap();
        assert!(!cores.is_empty());
    }

    #[test]
    fn test_set_for_current() {
        let cores = get_core_ids().unwrap();
        let first = cores[0];
        let pinned = std::thread::spawn(move || {
            assert!(set_for_current(first));
            get_core_ids().unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(pinned, vec![first]);
    }
}
