pub mod error;
pub mod manager;
pub mod types;

pub use error::{HooksError, Result};
pub use manager::PluginManager;
pub use types::{
    DispatchResult, HookContext, HookHandler, HookOutcome, Plugin, PluginMeta, PluginNotifier,
    ON_COMMAND, ON_MESSAGE, ON_REACTION, ON_SHUTDOWN, ON_STARTUP,
};
