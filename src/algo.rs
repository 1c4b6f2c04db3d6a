use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use std::{marker::PhantomData, ops::Neg};

use crate::{
    params::{Algorithm, TrainParams},
    vocab::{HuffmanCode, UnigramTable, Vocabulary},
};

pub const MAX_EXP: f32 = 6.0;
pub const EXP_TABLE_SIZE: usize = 1000;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + x.neg().exp())
}

fn log_sigmoid(x: f32) -> f32 {
    -(1.0 + x.neg().exp()).ln()
}

/// Sigmoid sampled over `(-MAX_EXP, MAX_EXP)`.
pub struct SigmoidTable {
    table: Vec<f32>,
}

impl SigmoidTable {
    pub fn new() -> Self {
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| sigmoid((i as f32 / EXP_TABLE_SIZE as f32 * 2.0 - 1.0) * MAX_EXP))
            .collect();
        Self { table }
    }

    pub fn get(&self, x: f32) -> f32 {
        let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as f32 / MAX_EXP / 2.0)) as usize;
        self.table[i.min(EXP_TABLE_SIZE - 1)]
    }
}

impl Default for SigmoidTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Input vectors start uniform in `[-0.5 / dim, 0.5 / dim)`.
pub fn init_input_layer(vocab_size: usize, dimension: usize, seed: u64) -> Vec<f32> {
    let bound = 0.5 / dimension as f32;
    let between = Uniform::new(-bound, bound);
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..vocab_size * dimension)
        .map(|_| between.sample(&mut rng))
        .collect()
}

/// A row-major matrix that every worker writes to without locking.
pub struct Hogwild<'a> {
    ptr: *mut f32,
    rows: usize,
    dim: usize,
    _marker: PhantomData<&'a mut [f32]>,
}

// SAFETY: This is "Hogwild!" style, so races on a row may occur, but the
// pointer stays valid for 'a and every access is bounds checked.
unsafe impl Send for Hogwild<'_> {}
unsafe impl Sync for Hogwild<'_> {}

impl<'a> Hogwild<'a> {
    pub fn new(data: &'a mut [f32], dim: usize) -> Self {
        assert!(dim > 0 && data.len() % dim == 0);
        Self {
            ptr: data.as_mut_ptr(),
            rows: data.len() / dim,
            dim,
            _marker: PhantomData,
        }
    }

    /// Callers hold at most one slice per row at a time within a thread.
    /// Other threads may write the same row concurrently (Hogwild!).
    #[allow(clippy::mut_from_ref)]
    fn row(&self, index: usize) -> &mut [f32] {
        assert!(index < self.rows, "row {index} out of {}", self.rows);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(index * self.dim), self.dim) }
    }
}

pub struct Layers<'a> {
    pub syn0: Hogwild<'a>,
    /// Hierarchical softmax inner nodes.
    pub syn1: Option<Hogwild<'a>>,
    /// Negative sampling output vectors.
    pub syn1neg: Option<Hogwild<'a>>,
}

/// Read-only state plus the shared weights, one per training run.
pub struct Shared<'a> {
    pub params: &'a TrainParams,
    pub vocab: &'a Vocabulary,
    pub layers: Layers<'a>,
    pub keep: Vec<f32>,
    pub unigram: UnigramTable,
    pub huffman: Vec<HuffmanCode>,
    pub sigmoid: SigmoidTable,
}

impl<'a> Shared<'a> {
    pub fn new(params: &'a TrainParams, vocab: &'a Vocabulary, layers: Layers<'a>) -> Self {
        let huffman = if layers.syn1.is_some() {
            crate::vocab::huffman_codes(vocab.counts())
        } else {
            Vec::new()
        };
        Self {
            params,
            vocab,
            layers,
            keep: vocab.keep_probabilities(params.sample),
            unigram: UnigramTable::new(vocab.counts(), params.ns_exponent),
            huffman,
            sigmoid: SigmoidTable::new(),
        }
    }
}

/// Per-worker buffers.
pub struct Scratch {
    neu1: Vec<f32>,
    neu1e: Vec<f32>,
    indices: Vec<u32>,
    rng: SmallRng,
}

impl Scratch {
    pub fn new(dimension: usize, seed: u64) -> Self {
        Self {
            neu1: vec![0.0; dimension],
            neu1e: vec![0.0; dimension],
            indices: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += a * x`
fn axpy(y: &mut [f32], a: f32, x: &[f32]) {
    y.iter_mut().zip(x).for_each(|(y, x)| *y += a * x);
}

fn negative_sampling(
    shared: &Shared,
    syn1neg: &Hogwild,
    rng: &mut SmallRng,
    word: u32,
    l1: &[f32],
    neu1e: &mut [f32],
    alpha: f32,
) -> f32 {
    let mut loss = 0.0;
    for d in 0..=shared.params.negative {
        let (target, label) = if d == 0 {
            (word, 1.0)
        } else {
            let target = shared.unigram.sample(rng);
            if target == word {
                continue;
            }
            (target, 0.0)
        };
        let out = syn1neg.row(target as usize);
        let f = dot(l1, out);
        let g = if f > MAX_EXP {
            (label - 1.0) * alpha
        } else if f < -MAX_EXP {
            label * alpha
        } else {
            (label - shared.sigmoid.get(f)) * alpha
        };
        if shared.params.compute_loss {
            loss -= log_sigmoid(if label > 0.0 { f } else { -f });
        }
        axpy(neu1e, g, out);
        axpy(out, g, l1);
    }
    loss
}

fn hierarchical_softmax(
    shared: &Shared,
    syn1: &Hogwild,
    word: u32,
    l1: &[f32],
    neu1e: &mut [f32],
    alpha: f32,
) -> f32 {
    let mut loss = 0.0;
    let path = &shared.huffman[word as usize];
    for (&code, &point) in path.codes.iter().zip(&path.points) {
        let out = syn1.row(point as usize);
        let f = dot(l1, out);
        if f <= -MAX_EXP || f >= MAX_EXP {
            continue;
        }
        let g = (1.0 - code as f32 - shared.sigmoid.get(f)) * alpha;
        if shared.params.compute_loss {
            loss -= log_sigmoid(if code == 0 { f } else { -f });
        }
        axpy(neu1e, g, out);
        axpy(out, g, l1);
    }
    loss
}

/// Pushes `l1` towards predicting `word`, accumulating the input error.
fn update_output(
    shared: &Shared,
    rng: &mut SmallRng,
    word: u32,
    l1: &[f32],
    neu1e: &mut [f32],
    alpha: f32,
) -> f32 {
    let mut loss = 0.0;
    if let Some(syn1) = &shared.layers.syn1 {
        loss += hierarchical_softmax(shared, syn1, word, l1, neu1e, alpha);
    }
    if let Some(syn1neg) = &shared.layers.syn1neg {
        loss += negative_sampling(shared, syn1neg, rng, word, l1, neu1e, alpha);
    }
    loss
}

fn reduced_window(rng: &mut SmallRng, window: usize, pos: usize, len: usize) -> (usize, usize) {
    let reduced = window - rng.gen_range(0..window);
    (pos.saturating_sub(reduced), (pos + reduced + 1).min(len))
}

pub fn cbow_pass(shared: &Shared, scratch: &mut Scratch, sentence: &[u32], alpha: f32) -> f32 {
    let Scratch {
        neu1, neu1e, rng, ..
    } = scratch;
    let syn0 = &shared.layers.syn0;
    let mut loss = 0.0;

    for (pos, &word) in sentence.iter().enumerate() {
        let (start, end) = reduced_window(rng, shared.params.window, pos, sentence.len());

        // === FORWARD PASS ===
        neu1.fill(0.0);
        neu1e.fill(0.0);
        let mut count = 0;
        for c in (start..end).filter(|&c| c != pos) {
            axpy(neu1, 1.0, syn0.row(sentence[c] as usize));
            count += 1;
        }
        if count == 0 {
            continue;
        }
        let inv_count = 1.0 / count as f32;
        if shared.params.cbow_mean {
            neu1.iter_mut().for_each(|v| *v *= inv_count);
        }

        loss += update_output(shared, rng, word, neu1, neu1e, alpha);

        // === BACKPROPAGATION ===
        if !shared.params.cbow_mean {
            neu1e.iter_mut().for_each(|v| *v *= inv_count);
        }
        for c in (start..end).filter(|&c| c != pos) {
            axpy(syn0.row(sentence[c] as usize), 1.0, neu1e);
        }
    }
    loss
}

pub fn skipgram_pass(
    shared: &Shared,
    scratch: &mut Scratch,
    sentence: &[u32],
    alpha: f32,
) -> f32 {
    let Scratch { neu1e, rng, .. } = scratch;
    let syn0 = &shared.layers.syn0;
    let mut loss = 0.0;

    for (pos, &word) in sentence.iter().enumerate() {
        let (start, end) = reduced_window(rng, shared.params.window, pos, sentence.len());
        for c in (start..end).filter(|&c| c != pos) {
            // the only live borrow of this syn0 row: read by the output
            // update, then written once by axpy
            let l1 = syn0.row(sentence[c] as usize);
            neu1e.fill(0.0);
            loss += update_output(shared, rng, word, l1, neu1e, alpha);
            axpy(l1, 1.0, neu1e);
        }
    }
    loss
}

/// Maps a job's sentences to vocabulary indices, downsamples frequent words
/// and trains on what is left. Returns the effective word count and loss.
pub fn train_sentences(
    shared: &Shared,
    scratch: &mut Scratch,
    sentences: &[Vec<String>],
    alpha: f32,
) -> (u64, f32) {
    let mut effective = 0u64;
    let mut loss = 0.0;
    let mut indices = std::mem::take(&mut scratch.indices);

    for sentence in sentences {
        indices.clear();
        for word in sentence {
            let Some(index) = shared.vocab.index(word) else {
                continue;
            };
            let keep = shared.keep[index as usize];
            if keep >= 1.0 || scratch.rng.gen::<f32>() < keep {
                indices.push(index);
            }
        }
        effective += indices.len() as u64;
        loss += match shared.params.algorithm {
            Algorithm::Cbow => cbow_pass(shared, scratch, &indices, alpha),
            Algorithm::SkipGram => skipgram_pass(shared, scratch, &indices, alpha),
        };
    }

    scratch.indices = indices;
    (effective, loss)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(n: usize) -> Vocabulary {
        Vocabulary::from_counts(
            (0..n).map(|i| (format!("w{i}"), (n - i) as u64 * 10)),
            1,
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid(0.23894692834), 0.5594541);
    }

    #[test]
    fn test_sigmoid_table() {
        let table = SigmoidTable::new();
        assert_eq!(table.get(0.0), 0.5);
        assert!((table.get(2.0) - sigmoid(2.0)).abs() < 0.01);
        assert!(table.get(-5.99) < 0.01);
    }

    #[test]
    fn test_init_input_layer() {
        let layer = init_input_layer(4, 10, 1);
        assert_eq!(layer.len(), 40);
        assert!(layer.iter().all(|v| v.abs() <= 0.05));
        assert_eq!(layer, init_input_layer(4, 10, 1));
    }

    #[test]
    fn test_negative_sampling_positive_only() {
        let params = TrainParams::default()
            .set_dimension(2)
            .set_negative(0)
            .set_compute_loss(true);
        let vocab = vocab(2);
        let mut syn0 = vec![0.5, -0.5, 0.3, 0.7];
        let mut syn1neg = vec![0.0; 4];
        let shared = Shared::new(
            &params,
            &vocab,
            Layers {
                syn0: Hogwild::new(&mut syn0, 2),
                syn1: None,
                syn1neg: Some(Hogwild::new(&mut syn1neg, 2)),
            },
        );
        let mut rng = SmallRng::seed_from_u64(0);
        let l1 = [0.5, -0.5];
        let mut neu1e = [0.0; 2];

        let loss = update_output(&shared, &mut rng, 1, &l1, &mut neu1e, 0.1);
        drop(shared);

        assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
        assert_eq!(neu1e, [0.0, 0.0]);
        assert_eq!(syn1neg, vec![0.0, 0.0, 0.025, -0.025]);
        assert_eq!(syn0, vec![0.5, -0.5, 0.3, 0.7]);
    }

    #[test]
    fn test_cbow_pass_updates_weights() {
        let params = TrainParams::default()
            .set_dimension(4)
            .set_window(2)
            .set_negative(2)
            .set_compute_loss(true);
        let vocab = vocab(5);
        let mut syn0 = init_input_layer(5, 4, 3);
        let mut syn1neg = vec![0.1; 20];
        let orig_input = syn0.clone();
        let loss = {
            let shared = Shared::new(
                &params,
                &vocab,
                Layers {
                    syn0: Hogwild::new(&mut syn0, 4),
                    syn1: None,
                    syn1neg: Some(Hogwild::new(&mut syn1neg, 4)),
                },
            );
            let mut scratch = Scratch::new(4, 1);
            cbow_pass(&shared, &mut scratch, &[0, 1, 2, 3, 4], 0.2)
        };

        assert!(loss.is_finite() && loss > 0.0);
        assert_ne!(syn0, orig_input, "input layer should be updated");
        assert_ne!(syn1neg, vec![0.1; 20], "output layer should be updated");
    }

    #[test]
    fn test_cbow_pass_single_word_is_skipped() {
        let params = TrainParams::default().set_dimension(2);
        let vocab = vocab(1);
        let mut syn0 = vec![0.1, 0.2];
        let mut syn1neg = vec![0.0; 2];
        let loss = {
            let shared = Shared::new(
                &params,
                &vocab,
                Layers {
                    syn0: Hogwild::new(&mut syn0, 2),
                    syn1: None,
                    syn1neg: Some(Hogwild::new(&mut syn1neg, 2)),
                },
            );
            cbow_pass(&shared, &mut Scratch::new(2, 1), &[0], 0.1)
        };
        assert_eq!(loss, 0.0);
        assert_eq!(syn0, vec![0.1, 0.2]);
        assert_eq!(syn1neg, vec![0.0, 0.0]);
    }

    #[test]
    fn test_skipgram_pass_with_hierarchical_softmax() {
        let params = TrainParams::default()
            .set_algorithm(Algorithm::SkipGram)
            .set_dimension(3)
            .set_window(1)
            .set_negative(0)
            .set_hs(true)
            .set_compute_loss(true);
        let vocab = vocab(3);
        let mut syn0 = init_input_layer(3, 3, 9);
        let mut syn1 = vec![0.0; 9];
        let orig_input = syn0.clone();
        let loss = {
            let shared = Shared::new(
                &params,
                &vocab,
                Layers {
                    syn0: Hogwild::new(&mut syn0, 3),
                    syn1: Some(Hogwild::new(&mut syn1, 3)),
                    syn1neg: None,
                },
            );
            skipgram_pass(&shared, &mut Scratch::new(3, 1), &[0, 1, 2], 0.5)
        };
        assert!(loss > 0.0);
        assert_ne!(syn1, vec![0.0; 9]);
        // syn1 starts at zero, so the first updates leave syn0 untouched but
        // later ones move it
        assert_ne!(syn0, orig_input);
    }

    #[test]
    fn test_train_sentences_skips_unknown_words() {
        let params = TrainParams::default().set_dimension(2).set_sample(0.0);
        let vocab = vocab(2);
        let mut syn0 = init_input_layer(2, 2, 1);
        let mut syn1neg = vec![0.0; 4];
        let shared = Shared::new(
            &params,
            &vocab,
            Layers {
                syn0: Hogwild::new(&mut syn0, 2),
                syn1: None,
                syn1neg: Some(Hogwild::new(&mut syn1neg, 2)),
            },
        );
        let sentences = vec![vec!["w0".to_string(), "nope".to_string(), "w1".to_string()]];
        let (effective, _) = train_sentences(&shared, &mut Scratch::new(2, 1), &sentences, 0.025);
        assert_eq!(effective, 2);
    }
}
