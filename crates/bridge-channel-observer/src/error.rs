use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelObserverError {
    #[error("corrupt state in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("lock timed out on {0}")]
    LockTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChannelObserverError>;
