use thiserror::Error;

#[derive(Debug, Error)]
pub enum HooksError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin not loaded: {0}")]
    PluginNotLoaded(String),

    #[error("missing dependencies: {0:?}")]
    MissingDependencies(Vec<String>),

    #[error("on_load failed for {name}: {reason}")]
    OnLoadFailed { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, HooksError>;
