//! CBOW/skip-gram word2vec training with negative sampling and hierarchical
//! softmax, plus the text8 benchmark that drives it.

pub mod algo;
pub mod cores;
pub mod corpus;
pub mod error;
pub mod logger;
pub mod model;
pub mod params;
pub mod trainer;
pub mod vocab;

pub use corpus::{Corpus, InMemoryCorpus, LineCorpus, Text8Corpus};
pub use error::{Result, Word2VecError};
pub use model::{PairEvaluation, VectorType, Word2VecModel};
pub use params::{Algorithm, TrainParams};
pub use trainer::{train, EpochStats, TrainingReport, Word2Vec};
pub use vocab::Vocabulary;
