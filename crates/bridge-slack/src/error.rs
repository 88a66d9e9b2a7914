use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("failed to init slack connector: {0}")]
    Connector(String),

    #[error("slack api call failed: {0}")]
    Api(String),

    #[error("file upload failed: {0}")]
    Upload(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SlackError>;
