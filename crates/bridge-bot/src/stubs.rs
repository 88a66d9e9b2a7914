//! Stand-ins for the LLM-backed contracts the observational-memory and
//! channel-observer pipelines drive through. The actual judge, digest,
//! reflection, promotion, and compaction calls are an external
//! collaborator this workspace only specifies the trait boundary for
//! (`Observer`/`Reflector`/`Promoter`/`Compactor`, `Judge`/`DigestEngine`/
//! `DigestCompressor`/`InterveneResponder`); these implementations keep
//! every pipeline fully wired and exercised without one, the same role
//! `GreeterPlugin`/`StopperPlugin` play against `PluginManager` in
//! `bridge-hooks`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use bridge_channel_observer::pipeline::{DigestCall, DigestCompressor, DigestEngine, InterveneResponder, Judge};
use bridge_channel_observer::types::{ChannelMessage, JudgeResult};
use bridge_memory::pipeline::{Compactor, ObserveOutput, Observer, PromoteOutput, Promoter, Reflector};
use bridge_memory::types::PersistentItem;
use bridge_memory::types::ObservationItem;

pub struct NoopObserver;

#[async_trait]
impl Observer for NoopObserver {
    async fn observe(&self, _existing: &[ObservationItem], _messages: &[Value]) -> anyhow::Result<ObserveOutput> {
        Ok(ObserveOutput::default())
    }
}

pub struct PassthroughReflector;

#[async_trait]
impl Reflector for PassthroughReflector {
    async fn reflect(&self, observations: &[ObservationItem]) -> anyhow::Result<Vec<ObservationItem>> {
        Ok(observations.to_vec())
    }
}

pub struct NoopPromoter;

#[async_trait]
impl Promoter for NoopPromoter {
    async fn promote(
        &self,
        _all_candidates: &[Value],
        _existing_persistent: &[PersistentItem],
    ) -> anyhow::Result<PromoteOutput> {
        Ok(PromoteOutput::default())
    }
}

pub struct PassthroughCompactor;

#[async_trait]
impl Compactor for PassthroughCompactor {
    async fn compact(&self, persistent: &[PersistentItem], _target_tokens: u64) -> anyhow::Result<Vec<PersistentItem>> {
        Ok(persistent.to_vec())
    }
}

pub struct NoopJudge;

#[async_trait]
impl Judge for NoopJudge {
    async fn judge(
        &self,
        _channel_id: &str,
        _digest: Option<&str>,
        _judged_messages: &[ChannelMessage],
        _pending_messages: &[ChannelMessage],
        _thread_buffers: &HashMap<String, Vec<ChannelMessage>>,
        _bot_user_id: Option<&str>,
    ) -> anyhow::Result<Option<JudgeResult>> {
        Ok(None)
    }
}

pub struct NoopDigestEngine;

#[async_trait]
impl DigestEngine for NoopDigestEngine {
    async fn digest(
        &self,
        _channel_id: &str,
        _existing_digest: Option<&str>,
        _judged_messages: &[ChannelMessage],
    ) -> anyhow::Result<Option<DigestCall>> {
        Ok(None)
    }
}

pub struct NoopDigestCompressor;

#[async_trait]
impl DigestCompressor for NoopDigestCompressor {
    async fn compress(&self, _digest: &str, _target_tokens: u64) -> anyhow::Result<Option<DigestCall>> {
        Ok(None)
    }
}

pub struct NoopInterveneResponder;

#[async_trait]
impl InterveneResponder for NoopInterveneResponder {
    async fn respond(
        &self,
        _digest: Option<&str>,
        _trigger: Option<&ChannelMessage>,
        _recent: &[ChannelMessage],
        _target: &str,
        _observer_reason: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}
