use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

mod context;
mod restart;
mod sink;
mod stubs;
mod tokens;

use bridge_channel_observer::pipeline::ChannelPipelineConfig;
use bridge_channel_observer::{ChannelStore, MentionTracker};
use bridge_core::config::BridgeConfig;
use bridge_engine::{EngineAdapter, LocalEngineAdapter, RemoteEngineAdapter};
use bridge_executor::{Executor, ResultProcessor, ResultSink};
use bridge_hooks::PluginManager;
use bridge_memory::pipeline::OMPipelineConfig;
use bridge_memory::MemoryStore;
use bridge_sessions::SessionStore;
use bridge_slack::{ChannelObserverRunner, CommandRouter, ContextInjector, SlackIngress, SlackTransport};

use crate::context::BridgeContextInjector;
use crate::restart::{DeferredRunningCount, ProcessRestartManager};
use crate::sink::{ChannelObserverBridge, OmResultSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bridge_bot=info".into()),
        )
        .init();

    let config_path = std::env::var("BRIDGE_CONFIG").ok();
    let config = BridgeConfig::load(config_path.as_deref())?;

    let sessions = Arc::new(SessionStore::new(&config.sessions.dir)?);
    let memory = Arc::new(MemoryStore::new(&config.memory.dir));
    let channels = Arc::new(ChannelStore::new(&config.channel_observer.dir));
    let mentions = Arc::new(MentionTracker::new(Duration::from_secs(config.channel_observer.mention_ttl_secs)));

    let plugin_manager = PluginManager::new(None);
    for name in &config.hooks.enabled_plugins {
        if let Err(err) = plugin_manager.load(name, serde_json::Value::Null, 0).await {
            warn!(plugin = %name, %err, "failed to load configured plugin");
        }
    }
    let plugins = Arc::new(plugin_manager);

    let engine: Arc<dyn EngineAdapter> = match &config.engine.remote_url {
        Some(url) => Arc::new(RemoteEngineAdapter::new(url.clone(), Duration::from_secs(config.engine.timeout_secs))),
        None => Arc::new(LocalEngineAdapter::new(
            config.engine.binary_path.clone(),
            Duration::from_secs(config.engine.timeout_secs),
        )),
    };

    let transport = Arc::new(SlackTransport::new(&config.slack)?);

    let restart_manager = Arc::new(ProcessRestartManager::new(transport.clone()));

    let om_config = OMPipelineConfig::default();
    let result_sink: Arc<dyn ResultSink> = Arc::new(OmResultSink::new(memory.clone(), sessions.clone(), om_config));

    let channel_pipeline_config = ChannelPipelineConfig {
        threshold_a: config.channel_observer.threshold_a as u64,
        threshold_b: config.channel_observer.threshold_b as u64,
        digest_max_tokens: config.channel_observer.digest_max_tokens,
        digest_target_tokens: config.channel_observer.digest_target_tokens,
        intervention_threshold: config.channel_observer.intervention_threshold,
        cooldown_secs: config.channel_observer.cooldown_secs,
        recent_window_secs: config.channel_observer.recent_window_secs,
        debug_channel: config.slack.debug_channel.clone(),
    };
    let channel_observer: Arc<dyn ChannelObserverRunner> = Arc::new(ChannelObserverBridge::new(
        channels.clone(),
        mentions.clone(),
        channel_pipeline_config,
        transport.clone(),
    ));

    let context_injector: Arc<dyn ContextInjector> = Arc::new(BridgeContextInjector::new(
        memory.clone(),
        sessions.clone(),
        channels.clone(),
        config.memory.max_context_chars as u64 / 4,
    ));

    let running_count = Arc::new(DeferredRunningCount::new());

    let executor = Arc::new(Executor::new(
        engine,
        sessions.clone(),
        Arc::new(ResultProcessor::new(transport.clone(), restart_manager.clone(), running_count.clone())),
        Some(result_sink),
        config.engine.model.clone(),
    ));
    running_count.bind(executor.clone());

    let router = Arc::new(CommandRouter::new(
        sessions.clone(),
        restart_manager.clone(),
        running_count.clone(),
        Some(plugins.clone()),
        transport.clone(),
    ));

    let ingress = SlackIngress::new(
        transport.client(),
        transport.app_token(),
        transport.clone(),
        transport.clone(),
        executor.clone(),
        sessions.clone(),
        router.clone(),
        restart_manager.clone(),
        Some(plugins.clone()),
        channels.clone(),
        mentions.clone(),
        Some(channel_observer.clone()),
        Some(context_injector.clone()),
        config.slack.bot_user_id.clone(),
        config.auth.admin_users.clone(),
        config.slack.debug_channel.clone(),
        config.channel_observer.trigger_word.clone(),
    );

    ingress.listen().await?;
    info!("bridge-bot listening");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
