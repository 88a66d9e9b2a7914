use thiserror::Error;

/// §7 error kinds the executor crate is responsible for surfacing; all of
/// them are caught internally and converted into a `ResultProcessor` call
/// rather than propagated — per §7's "only the Executor's lifecycle and
/// the process-startup path may propagate to the top-level".
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("engine call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Session(#[from] bridge_sessions::SessionError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
