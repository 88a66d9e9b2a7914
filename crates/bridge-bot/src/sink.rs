//! Wires the executor's post-turn hook and the ambient channel collector
//! into the two pipelines that actually own state: `OMPipeline` (§4.5) and
//! `ChannelPipeline` (§4.4). Both pipelines are lifetime-generic over their
//! LLM-backed collaborators, so each call constructs one fresh, borrowing
//! from fields this struct owns — never stored across calls, the same
//! non-escaping pattern `bridge-slack`'s `run_turn` uses for its own
//! `PresentationContext`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use bridge_channel_observer::pipeline::ChannelPipelineConfig;
use bridge_channel_observer::{ChannelPipeline, ChannelStore, ChannelTransport, MentionTracker};
use bridge_executor::{EngineCallResult, ResultSink};
use bridge_memory::pipeline::{OMPipeline, OMPipelineConfig};
use bridge_memory::MemoryStore;
use bridge_sessions::SessionStore;
use bridge_slack::ChannelObserverRunner;

use crate::stubs::{NoopDigestCompressor, NoopDigestEngine, NoopInterveneResponder, NoopJudge, NoopObserver, NoopPromoter, PassthroughCompactor, PassthroughReflector};
use crate::tokens::approx_token_count;

/// `ResultSink` implementation: feeds a finished turn's transcript into
/// the observational-memory pipeline.
pub struct OmResultSink {
    store: Arc<MemoryStore>,
    sessions: Arc<SessionStore>,
    config: OMPipelineConfig,
}

impl OmResultSink {
    pub fn new(store: Arc<MemoryStore>, sessions: Arc<SessionStore>, config: OMPipelineConfig) -> Self {
        Self { store, sessions, config }
    }
}

#[async_trait]
impl ResultSink for OmResultSink {
    async fn on_result(&self, result: &EngineCallResult, thread_ts: &str, user_message: Option<&str>) {
        if !result.success {
            return;
        }
        let Some(user_message) = user_message else {
            return;
        };

        let session = match self.sessions.get(&bridge_core::types::ThreadTs(thread_ts.to_string())) {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(err) => {
                warn!(thread_ts, %err, "failed to look up session for OM turn");
                return;
            }
        };

        let messages = vec![
            serde_json::json!({"role": "user", "content": user_message}),
            serde_json::json!({"role": "assistant", "content": result.output}),
        ];

        let observer = NoopObserver;
        let reflector = PassthroughReflector;
        let promoter = NoopPromoter;
        let compactor = PassthroughCompactor;
        let pipeline = OMPipeline::new(
            &self.store,
            self.config.clone(),
            &observer,
            &reflector,
            &promoter,
            &compactor,
            &approx_token_count,
        );

        if let Err(err) = pipeline
            .run_turn(thread_ts, session.user_id.as_str(), &session.username, &messages)
            .await
        {
            warn!(thread_ts, %err, "observational memory turn failed");
        }
    }
}

/// `ChannelObserverRunner` implementation: runs `ChannelPipeline` with
/// per-channel single-flight gating, mirroring the original's
/// `_digest_running` module-level guard.
pub struct ChannelObserverBridge {
    store: Arc<ChannelStore>,
    mentions: Arc<MentionTracker>,
    config: ChannelPipelineConfig,
    transport: Arc<dyn ChannelTransport>,
    running: DashMap<String, ()>,
}

impl ChannelObserverBridge {
    pub fn new(
        store: Arc<ChannelStore>,
        mentions: Arc<MentionTracker>,
        config: ChannelPipelineConfig,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            store,
            mentions,
            config,
            transport,
            running: DashMap::new(),
        }
    }
}

#[async_trait]
impl ChannelObserverRunner for ChannelObserverBridge {
    async fn observe(&self, channel_id: &str, bot_user_id: Option<&str>, force: bool) {
        if self.running.contains_key(channel_id) {
            return;
        }
        self.running.insert(channel_id.to_string(), ());

        let mut config = self.config.clone();
        if force {
            config.threshold_a = 0;
        }

        let judge = NoopJudge;
        let digest_engine = NoopDigestEngine;
        let compressor = NoopDigestCompressor;
        let intervene_responder = NoopInterveneResponder;
        let pipeline = ChannelPipeline::new(
            &self.store,
            &self.mentions,
            config,
            &approx_token_count,
            &judge,
            &digest_engine,
            Some(&compressor),
            Some(&intervene_responder),
            self.transport.as_ref(),
        );

        match pipeline.run(channel_id, bot_user_id).await {
            Ok(outcome) => info!(channel_id, digest_refreshed = outcome.digest_refreshed, "channel pipeline run complete"),
            Err(err) => warn!(channel_id, %err, "channel pipeline run failed"),
        }

        self.running.remove(channel_id);
    }
}
