use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::error::{Result, Word2VecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Cbow,
    #[serde(alias = "sg")]
    SkipGram,
}

/// Hyperparameters for a training run.
///
/// Built with the `set_*` chain or read from a TOML file; any key missing
/// from the file keeps its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainParams {
    pub algorithm: Algorithm,
    pub dimension: usize,
    pub window: usize,
    pub workers: usize,
    /// Noise words drawn per prediction, 0 disables negative sampling.
    pub negative: usize,
    /// Hierarchical softmax output layer.
    pub hs: bool,
    pub epochs: usize,
    /// Raw words per job handed to a worker.
    pub batch_words: usize,
    pub alpha: f32,
    pub min_alpha: f32,
    pub min_count: u64,
    pub sample: f64,
    pub ns_exponent: f64,
    pub cbow_mean: bool,
    pub seed: u64,
    pub max_sentence_length: usize,
    pub compute_loss: bool,
    pub pin_workers: bool,
    /// Seconds between progress lines.
    pub report_delay: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Cbow,
            dimension: 100,
            window: 5,
            workers: 3,
            negative: 5,
            hs: false,
            epochs: 5,
            batch_words: 10_000,
            alpha: 0.025,
            min_alpha: 0.0001,
            min_count: 5,
            sample: 1e-3,
            ns_exponent: 0.75,
            cbow_mean: true,
            seed: 1,
            max_sentence_length: crate::corpus::MAX_SENTENCE_LENGTH,
            compute_loss: false,
            pin_workers: false,
            report_delay: 1.0,
        }
    }
}

impl TrainParams {
    /// The fixed text8 benchmark run: CBOW, 100 dimensions, window 5,
    /// 4 workers, 5 negatives, a single epoch over 10000-word jobs.
    pub fn benchmark() -> Self {
        Self::default()
            .set_algorithm(Algorithm::Cbow)
            .set_dimension(100)
            .set_window(5)
            .set_workers(4)
            .set_negative(5)
            .set_epochs(1)
            .set_batch_words(10_000)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let params: Self = toml::from_str(raw)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn set_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
    pub fn set_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
    pub fn set_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
    pub fn set_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
    pub fn set_negative(mut self, negative: usize) -> Self {
        self.negative = negative;
        self
    }
    pub fn set_hs(mut self, hs: bool) -> Self {
        self.hs = hs;
        self
    }
    pub fn set_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }
    pub fn set_batch_words(mut self, batch_words: usize) -> Self {
        self.batch_words = batch_words;
        self
    }
    pub fn set_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }
    pub fn set_min_alpha(mut self, min_alpha: f32) -> Self {
        self.min_alpha = min_alpha;
        self
    }
    pub fn set_min_count(mut self, min_count: u64) -> Self {
        self.min_count = min_count;
        self
    }
    pub fn set_sample(mut self, sample: f64) -> Self {
        self.sample = sample;
        self
    }
    pub fn set_cbow_mean(mut self, cbow_mean: bool) -> Self {
        self.cbow_mean = cbow_mean;
        self
    }
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn set_compute_loss(mut self, compute_loss: bool) -> Self {
        self.compute_loss = compute_loss;
        self
    }
    pub fn set_pin_workers(mut self, pin_workers: bool) -> Self {
        self.pin_workers = pin_workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dimension", self.dimension),
            ("window", self.window),
            ("workers", self.workers),
            ("epochs", self.epochs),
            ("batch_words", self.batch_words),
            ("max_sentence_length", self.max_sentence_length),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Word2VecError::invalid_params(format!(
                "{name} must be greater than 0"
            )));
        }
        if self.negative == 0 && !self.hs {
            return Err(Word2VecError::invalid_params(
                "either negative sampling or hierarchical softmax must be enabled",
            ));
        }
        let finite = [
            ("alpha", self.alpha as f64),
            ("min_alpha", self.min_alpha as f64),
            ("sample", self.sample),
            ("ns_exponent", self.ns_exponent),
            ("report_delay", self.report_delay),
        ];
        if let Some((name, _)) = finite.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(Word2VecError::invalid_params(format!(
                "{name} must be finite and not negative"
            )));
        }
        if self.alpha <= 0.0 {
            return Err(Word2VecError::invalid_params("alpha must be positive"));
        }
        if self.min_alpha > self.alpha {
            return Err(Word2VecError::invalid_params(
                "min_alpha must be within 0..=alpha",
            ));
        }
        if Duration::try_from_secs_f64(self.report_delay).is_err() {
            return Err(Word2VecError::invalid_params("report_delay is out of range"));
        }
        Ok(())
    }
}
