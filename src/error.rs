use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Word2VecError {
    #[error("corpus file not found: {}", path.display())]
    CorpusNotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid training parameters: {message}")]
    InvalidParams { message: String },

    #[error("no word in the corpus reaches min_count")]
    EmptyVocabulary,

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed vector file at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("a training worker panicked")]
    WorkerPanicked,

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Word2VecError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Word2VecError>;
