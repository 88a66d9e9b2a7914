use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// What a handler tells the dispatcher to do with the chain (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Append this handler's value and keep going.
    Continue,
    /// Omit this handler's value, keep going.
    Skip,
    /// Append this handler's value and halt the chain.
    Stop,
}

/// Identity and version info a plugin reports about itself.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
}

impl PluginMeta {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The argument bag passed into a hook invocation; untyped like the core's
/// payload so dispatch stays decoupled from any one hook's shape.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub hook_name: String,
    pub args: Value,
}

impl HookContext {
    pub fn new(hook_name: impl Into<String>, args: Value) -> Self {
        Self {
            hook_name: hook_name.into(),
            args,
        }
    }
}

/// One hook handler a plugin exposes from `register_hooks`.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<(HookOutcome, Value)>;
}

/// A plugin instance, constructed fresh by its registered factory on every
/// load/reload (the in-process equivalent of re-executing a module's
/// top-level code).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn meta(&self) -> &PluginMeta;
    async fn on_load(&mut self, config: &Value) -> anyhow::Result<()>;
    async fn on_unload(&mut self) -> anyhow::Result<()>;
    fn register_hooks(&self) -> HashMap<String, Arc<dyn HookHandler>>;
}

/// Hook names used by the core (§4.7). Plugins are free to register others.
pub const ON_STARTUP: &str = "on_startup";
pub const ON_SHUTDOWN: &str = "on_shutdown";
pub const ON_MESSAGE: &str = "on_message";
pub const ON_REACTION: &str = "on_reaction";
pub const ON_COMMAND: &str = "on_command";

/// Result of dispatching one hook name across every registered handler.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub results: Vec<Value>,
    pub stopped: bool,
}

/// Notifies an external surface (e.g. posts "plugin X loaded" to Slack).
/// Failures here must never be allowed to fail a load/unload.
#[async_trait]
pub trait PluginNotifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}
