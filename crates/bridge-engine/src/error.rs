use thiserror::Error;

/// §7 error kinds relevant to the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine binary not found at '{0}'")]
    EngineUnavailable(String),

    #[error("engine process error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("failed to parse engine output line: {0}")]
    Parse(String),

    #[error("engine call timed out after {0}s")]
    Timeout(u64),

    #[error("remote engine request failed: {0}")]
    Remote(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
