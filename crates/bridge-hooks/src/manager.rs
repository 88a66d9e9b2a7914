use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::error::{HooksError, Result};
use crate::types::{DispatchResult, HookContext, HookHandler, HookOutcome, Plugin, PluginMeta, PluginNotifier};

type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// A plugin currently loaded into the host, plus what's needed to
/// reconstruct it on reload (factories carry no state of their own).
struct LoadedPlugin {
    plugin: Box<dyn Plugin>,
    config: Value,
    priority: i32,
    depends_on: Vec<String>,
}

/// One registered handler, flattened out of a plugin's `register_hooks`
/// for dispatch. Order of registration is preserved for stable tie-breaks.
struct RegisteredHandler {
    plugin_name: String,
    priority: i32,
    seq: u64,
    handler: Arc<dyn HookHandler>,
}

/// Loads, unloads, reloads, and dispatches plugins (§4.7).
///
/// Plugins have no runtime module system to reimport in Rust, so instead
/// of Python's `importlib.reload`, each plugin is registered up front as a
/// named factory closure. `reload` replays the plugin's stored config and
/// priority through the same factory to produce a fresh instance — the
/// in-process equivalent of re-executing a module's top-level code.
pub struct PluginManager {
    factories: HashMap<String, (PluginFactory, Vec<String>)>,
    loaded: RwLock<HashMap<String, LoadedPlugin>>,
    handlers: RwLock<HashMap<String, Vec<RegisteredHandler>>>,
    notifier: Option<Arc<dyn PluginNotifier>>,
    seq: std::sync::atomic::AtomicU64,
}

impl PluginManager {
    pub fn new(notifier: Option<Arc<dyn PluginNotifier>>) -> Self {
        Self {
            factories: HashMap::new(),
            loaded: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            notifier,
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Registers a plugin factory under `name`. `depends_on` names other
    /// factories that must already be loaded before this one can load.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        depends_on: Vec<String>,
        factory: impl Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), (Arc::new(factory), depends_on));
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().await.contains_key(name)
    }

    pub async fn loaded_names(&self) -> Vec<String> {
        self.loaded.read().await.keys().cloned().collect()
    }

    pub async fn load(&self, name: &str, config: Value, priority: i32) -> Result<()> {
        let (factory, depends_on) = self
            .factories
            .get(name)
            .ok_or_else(|| HooksError::PluginNotFound(name.to_string()))?
            .clone();

        {
            let loaded = self.loaded.read().await;
            let missing: Vec<String> = depends_on
                .iter()
                .filter(|dep| !loaded.contains_key(*dep))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(HooksError::MissingDependencies(missing));
            }
        }

        let mut plugin = factory();
        if let Err(err) = plugin.on_load(&config).await {
            return Err(HooksError::OnLoadFailed {
                name: name.to_string(),
                reason: err.to_string(),
            });
        }

        let handler_map = plugin.register_hooks();
        self.install_handlers(name, priority, handler_map).await;

        self.loaded.write().await.insert(
            name.to_string(),
            LoadedPlugin {
                plugin,
                config,
                priority,
                depends_on,
            },
        );

        self.notify(&format!("plugin loaded: {name}")).await;
        Ok(())
    }

    pub async fn unload(&self, name: &str) -> Result<()> {
        let mut loaded = self.loaded.write().await;
        let mut entry = loaded
            .remove(name)
            .ok_or_else(|| HooksError::PluginNotLoaded(name.to_string()))?;
        drop(loaded);

        if let Err(err) = entry.plugin.on_unload().await {
            warn!(plugin = name, error = %err, "on_unload failed, unloading anyway");
        }

        self.remove_handlers(name).await;
        self.notify(&format!("plugin unloaded: {name}")).await;
        Ok(())
    }

    /// Unloads and reloads a plugin through the same factory, replaying its
    /// stored config/priority/depends_on. Emits exactly one notification.
    pub async fn reload(&self, name: &str) -> Result<()> {
        let (config, priority) = {
            let loaded = self.loaded.read().await;
            let entry = loaded
                .get(name)
                .ok_or_else(|| HooksError::PluginNotLoaded(name.to_string()))?;
            (entry.config.clone(), entry.priority)
        };

        {
            let mut loaded = self.loaded.write().await;
            if let Some(mut entry) = loaded.remove(name) {
                if let Err(err) = entry.plugin.on_unload().await {
                    warn!(plugin = name, error = %err, "on_unload failed during reload, continuing");
                }
            }
        }
        self.remove_handlers(name).await;

        let (factory, depends_on) = self
            .factories
            .get(name)
            .ok_or_else(|| HooksError::PluginNotFound(name.to_string()))?
            .clone();
        let mut plugin = factory();
        if let Err(err) = plugin.on_load(&config).await {
            return Err(HooksError::OnLoadFailed {
                name: name.to_string(),
                reason: err.to_string(),
            });
        }

        let handler_map = plugin.register_hooks();
        self.install_handlers(name, priority, handler_map).await;
        self.loaded.write().await.insert(
            name.to_string(),
            LoadedPlugin {
                plugin,
                config,
                priority,
                depends_on,
            },
        );

        self.notify(&format!("plugin reloaded: {name}")).await;
        Ok(())
    }

    /// Dispatches `hook_name` across every registered handler in
    /// priority-descending order, ties broken by registration order.
    /// Handler errors are logged and treated as `Skip`; never abort the
    /// chain. Stops (including the stopping handler's own value) on the
    /// first `Stop`.
    pub async fn dispatch(&self, ctx: &HookContext) -> DispatchResult {
        let handlers = self.handlers.read().await;
        let Some(chain) = handlers.get(&ctx.hook_name) else {
            return DispatchResult::default();
        };

        let mut results = Vec::new();
        let mut stopped = false;
        for entry in chain {
            match entry.handler.call(ctx).await {
                Ok((HookOutcome::Continue, value)) => results.push(value),
                Ok((HookOutcome::Skip, _)) => {}
                Ok((HookOutcome::Stop, value)) => {
                    results.push(value);
                    stopped = true;
                    break;
                }
                Err(err) => {
                    error!(
                        plugin = entry.plugin_name,
                        hook = ctx.hook_name,
                        error = %err,
                        "hook handler failed, skipping"
                    );
                }
            }
        }

        DispatchResult { results, stopped }
    }

    pub async fn plugin_metas(&self) -> Vec<PluginMeta> {
        self.loaded
            .read()
            .await
            .values()
            .map(|entry| entry.plugin.meta().clone())
            .collect()
    }

    /// Posts a one-line summary of loaded plugins via the notifier, if any.
    /// Notifier failures are swallowed — they must never fail startup.
    pub async fn notify_startup_summary(&self) {
        let names = self.loaded_names().await;
        if names.is_empty() {
            return;
        }
        let mut sorted = names;
        sorted.sort();
        self.notify(&format!("plugins loaded: {}", sorted.join(", "))).await;
    }

    async fn notify(&self, message: &str) {
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.notify(message).await {
                warn!(error = %err, "plugin notifier failed");
            }
        }
    }

    async fn install_handlers(&self, plugin_name: &str, priority: i32, handler_map: HashMap<String, Arc<dyn HookHandler>>) {
        let mut handlers = self.handlers.write().await;
        for (hook_name, handler) in handler_map {
            let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let chain = handlers.entry(hook_name).or_default();
            chain.push(RegisteredHandler {
                plugin_name: plugin_name.to_string(),
                priority,
                seq,
                handler,
            });
            chain.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        }
    }

    async fn remove_handlers(&self, plugin_name: &str) {
        let mut handlers = self.handlers.write().await;
        for chain in handlers.values_mut() {
            chain.retain(|entry| entry.plugin_name != plugin_name);
        }
        handlers.retain(|_, chain| !chain.is_empty());
    }
}
