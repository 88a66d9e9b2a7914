use thiserror::Error;

/// Error kinds (§7). These are the only variants any pipeline in this
/// workspace is allowed to produce; background pipelines catch and log
/// their own, only the executor lifecycle and process startup propagate.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transient LLM failure: {0}")]
    TransientLlm(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("engine timed out after {ms}ms")]
    EngineTimeout { ms: u64 },

    #[error("interrupted")]
    Interrupted,

    #[error("corrupt state in {path}: {reason}")]
    CorruptState { path: String, reason: String },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Short code, analogous to an error-kind tag for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::TransientLlm(_) => "TRANSIENT_LLM",
            BridgeError::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            BridgeError::EngineTimeout { .. } => "ENGINE_TIMEOUT",
            BridgeError::Interrupted => "INTERRUPTED",
            BridgeError::CorruptState { .. } => "CORRUPT_STATE",
            BridgeError::TransportError(_) => "TRANSPORT_ERROR",
            BridgeError::Fatal(_) => "FATAL",
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }

    /// True for errors that represent a terminal-but-expected outcome
    /// rather than a failure to be surfaced as "something went wrong".
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BridgeError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
