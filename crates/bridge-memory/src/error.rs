use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("record corrupt: {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock timeout: {0}")]
    LockTimeout(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
