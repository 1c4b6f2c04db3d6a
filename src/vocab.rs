use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use crate::{
    corpus::Corpus,
    error::{Result, Word2VecError},
};

/// Words kept after `min_count`, most frequent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Vec<String>,
    counts: Vec<u64>,
    index: HashMap<String, u32>,
    raw_words: u64,
}

impl Vocabulary {
    pub fn build<C: Corpus + ?Sized>(corpus: &C, min_count: u64) -> Result<Self> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut raw_words = 0u64;
        for sentence in corpus.sentences()? {
            for word in sentence? {
                raw_words += 1;
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        let unique = counts.len();
        let vocab = Self::from_counts(counts, min_count, raw_words)?;
        tracing::info!(
            raw_words,
            unique_words = unique,
            retained_unique = vocab.len(),
            retained_words = vocab.retained_words(),
            min_count,
            "Collected vocabulary"
        );
        Ok(vocab)
    }

    pub fn from_counts<I>(counts: I, min_count: u64, raw_words: u64) -> Result<Self>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut kept: Vec<(String, u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .collect();
        if kept.is_empty() {
            return Err(Word2VecError::EmptyVocabulary);
        }
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let index = kept
            .iter()
            .enumerate()
            .map(|(i, (word, _))| (word.clone(), i as u32))
            .collect();
        let (words, counts) = kept.into_iter().unzip();
        Ok(Self {
            words,
            counts,
            index,
            raw_words,
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn index(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }

    pub fn word(&self, index: u32) -> Option<&str> {
        self.words.get(index as usize).map(String::as_str)
    }

    pub fn count(&self, index: u32) -> u64 {
        self.counts.get(index as usize).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    /// Tokens seen in the corpus, including the ones dropped by `min_count`.
    pub fn raw_words(&self) -> u64 {
        self.raw_words
    }

    pub fn retained_words(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Probability of keeping each word when downsampling frequent words.
    pub fn keep_probabilities(&self, sample: f64) -> Vec<f32> {
        if sample <= 0.0 {
            return vec![1.0; self.len()];
        }
        let threshold = sample * self.retained_words() as f64;
        self.counts
            .iter()
            .map(|&count| {
                let count = count as f64;
                let p = ((count / threshold).sqrt() + 1.0) * (threshold / count);
                p.min(1.0) as f32
            })
            .collect()
    }
}

/// Cumulative `count^exponent` distribution for drawing negative samples.
#[derive(Debug, Clone)]
pub struct UnigramTable {
    cumulative: Vec<u32>,
}

impl UnigramTable {
    pub fn new(counts: &[u64], exponent: f64) -> Self {
        let weights: Vec<f64> = counts.iter().map(|&c| (c as f64).powf(exponent)).collect();
        let total: f64 = weights.iter().sum();
        let mut acc = 0.0;
        let mut cumulative: Vec<u32> = weights
            .iter()
            .map(|w| {
                acc += w;
                (acc / total * u32::MAX as f64).round() as u32
            })
            .collect();
        if let Some(last) = cumulative.last_mut() {
            *last = u32::MAX;
        }
        Self { cumulative }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let r: u32 = rng.gen();
        let i = self.cumulative.partition_point(|&c| c <= r);
        i.min(self.cumulative.len() - 1) as u32
    }
}

/// Path from the Huffman root to a word: the branch taken (`codes`) at each
/// inner node (`points`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HuffmanCode {
    pub codes: Vec<u8>,
    pub points: Vec<u32>,
}

pub fn huffman_codes(counts: &[u64]) -> Vec<HuffmanCode> {
    let n = counts.len();
    if n < 2 {
        return vec![HuffmanCode::default(); n];
    }
    let mut parent = vec![0usize; 2 * n - 1];
    let mut branch = vec![0u8; 2 * n - 1];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| Reverse((c, i)))
        .collect();

    let mut next = n;
    while let (Some(Reverse((c1, a))), Some(Reverse((c2, b)))) = (heap.pop(), heap.pop()) {
        parent[a] = next;
        parent[b] = next;
        branch[a] = 0;
        branch[b] = 1;
        heap.push(Reverse((c1 + c2, next)));
        next += 1;
    }

    let root = 2 * n - 2;
    (0..n)
        .map(|leaf| {
            let mut code = HuffmanCode::default();
            let mut node = leaf;
            while node != root {
                code.codes.push(branch[node]);
                node = parent[node];
                code.points.push((node - n) as u32);
            }
            code.codes.reverse();
            code.points.reverse();
            code
        })
        .collect()
}
