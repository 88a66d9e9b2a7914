//! Digest/judge separation pipeline (§4.4). Runs per channel, single-flight,
//! triggered when the pending buffer crosses `threshold_a` tokens.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::error::Result;
use crate::intervention::{intervention_probability, InterventionState};
use crate::mention_tracker::MentionTracker;
use crate::store::ChannelStore;
use crate::types::{
    ActionKind, ChannelMessage, DigestMeta, InterventionAction, JudgeResult, PipelineOutcome,
};

/// Outcome of a digest or compression LLM round.
#[derive(Debug, Clone)]
pub struct DigestCall {
    pub content: String,
    pub token_count: u64,
}

#[async_trait]
pub trait DigestEngine: Send + Sync {
    async fn digest(
        &self,
        channel_id: &str,
        existing_digest: Option<&str>,
        judged_messages: &[ChannelMessage],
    ) -> anyhow::Result<Option<DigestCall>>;
}

#[async_trait]
pub trait DigestCompressor: Send + Sync {
    async fn compress(&self, digest: &str, target_tokens: u64) -> anyhow::Result<Option<DigestCall>>;
}

#[async_trait]
pub trait Judge: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn judge(
        &self,
        channel_id: &str,
        digest: Option<&str>,
        judged_messages: &[ChannelMessage],
        pending_messages: &[ChannelMessage],
        thread_buffers: &HashMap<String, Vec<ChannelMessage>>,
        bot_user_id: Option<&str>,
    ) -> anyhow::Result<Option<JudgeResult>>;
}

/// Regenerates an intervention response conditioned on the digest, the
/// trigger message, and nearby context, in place of posting the judge's
/// draft directly (§4.4.2).
#[async_trait]
pub trait InterveneResponder: Send + Sync {
    async fn respond(
        &self,
        digest: Option<&str>,
        trigger: Option<&ChannelMessage>,
        recent: &[ChannelMessage],
        target: &str,
        observer_reason: Option<&str>,
    ) -> anyhow::Result<Option<String>>;
}

/// Side effects against the transport: reactions, posted messages, and the
/// structured debug trace.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn react(&self, channel_id: &str, ts: &str, emoji: &str) -> anyhow::Result<()>;
    async fn post_message(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> anyhow::Result<()>;
    async fn debug_log(&self, debug_channel: &str, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ChannelPipelineConfig {
    pub threshold_a: u64,
    pub threshold_b: u64,
    pub digest_max_tokens: u64,
    pub digest_target_tokens: u64,
    pub intervention_threshold: f64,
    pub cooldown_secs: u64,
    pub recent_window_secs: u64,
    pub debug_channel: Option<String>,
}

pub struct ChannelPipeline<'a> {
    store: &'a ChannelStore,
    mentions: &'a MentionTracker,
    config: ChannelPipelineConfig,
    count_tokens: &'a dyn Fn(&str) -> u64,
    judge: &'a dyn Judge,
    digest_engine: &'a dyn DigestEngine,
    compressor: Option<&'a dyn DigestCompressor>,
    intervene_responder: Option<&'a dyn InterveneResponder>,
    transport: &'a dyn ChannelTransport,
}

impl<'a> ChannelPipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a ChannelStore,
        mentions: &'a MentionTracker,
        config: ChannelPipelineConfig,
        count_tokens: &'a dyn Fn(&str) -> u64,
        judge: &'a dyn Judge,
        digest_engine: &'a dyn DigestEngine,
        compressor: Option<&'a dyn DigestCompressor>,
        intervene_responder: Option<&'a dyn InterveneResponder>,
        transport: &'a dyn ChannelTransport,
    ) -> Self {
        Self {
            store,
            mentions,
            config,
            count_tokens,
            judge,
            digest_engine,
            compressor,
            intervene_responder,
            transport,
        }
    }

    /// One pipeline run for `channel_id` (§4.4.1-§4.4.4). The caller is
    /// responsible for single-flight gating (a `running` flag per channel).
    pub async fn run(&self, channel_id: &str, bot_user_id: Option<&str>) -> Result<PipelineOutcome> {
        let mut outcome = PipelineOutcome::default();

        // (a) pending token gate.
        let pending_tokens = self.store.count_pending_tokens(channel_id, self.count_tokens)?;
        if pending_tokens < self.config.threshold_a {
            return Ok(outcome);
        }

        // (a->b) digest fold-in.
        let judged_plus_pending = self
            .store
            .count_judged_plus_pending_tokens(channel_id, self.count_tokens)?;
        if judged_plus_pending > self.config.threshold_b {
            self.fold_in_digest(channel_id, &mut outcome).await?;
        }

        // (b) judge.
        let digest = self.store.get_digest(channel_id)?.map(|d| d.content);
        let judged = self.store.load_judged(channel_id)?;
        let pending = self.store.load_pending(channel_id)?;
        let all_thread_buffers = self.store.load_all_thread_buffers(channel_id)?;

        let (judge_pending, _filtered_pending_ts) = self.filter_mention_tracked(&pending);
        let judge_thread_buffers: HashMap<String, Vec<ChannelMessage>> = all_thread_buffers
            .iter()
            .filter(|(thread_ts, _)| !self.mentions.is_tracked(thread_ts))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let judge_result = match self
            .judge
            .judge(
                channel_id,
                digest.as_deref(),
                &judged,
                &judge_pending,
                &judge_thread_buffers,
                bot_user_id,
            )
            .await
        {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(channel_id, "judge returned no result");
                return Ok(outcome);
            }
            Err(e) => {
                warn!(channel_id, error = %e, "judge call failed");
                return Ok(outcome);
            }
        };

        self.handle_reactions(channel_id, &judge_result, &pending, &mut outcome)
            .await?;

        // (e) post-run housekeeping: always runs, even with no judge actions,
        // because buffer progression does not depend on judge outcome once
        // judge itself succeeded.
        self.store.move_pending_to_judged(channel_id)?;
        let moved_thread_tses: Vec<String> = all_thread_buffers.keys().cloned().collect();
        self.store.clear_thread_buffers(channel_id, &moved_thread_tses)?;

        Ok(outcome)
    }

    async fn fold_in_digest(&self, channel_id: &str, outcome: &mut PipelineOutcome) -> Result<()> {
        let judged = self.store.load_judged(channel_id)?;
        if judged.is_empty() {
            return Ok(());
        }
        let existing_digest = self.store.get_digest(channel_id)?.map(|d| d.content);

        let digest_result = match self
            .digest_engine
            .digest(channel_id, existing_digest.as_deref(), &judged)
            .await
        {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(channel_id, "digest call returned no result");
                return Ok(());
            }
            Err(e) => {
                warn!(channel_id, error = %e, "digest call failed");
                return Ok(());
            }
        };

        self.store.save_digest(
            channel_id,
            digest_result.content.clone(),
            DigestMeta {
                token_count: digest_result.token_count,
                last_digested_at: Some(Utc::now().to_rfc3339()),
                last_compressed_at: None,
            },
        )?;
        self.store.clear_judged(channel_id)?;
        outcome.digest_refreshed = true;
        info!(channel_id, tokens = digest_result.token_count, "digest folded in");

        if digest_result.token_count > self.config.digest_max_tokens {
            if let Some(compressor) = self.compressor {
                match compressor
                    .compress(&digest_result.content, self.config.digest_target_tokens)
                    .await
                {
                    Ok(Some(compressed)) => {
                        let now = Utc::now().to_rfc3339();
                        self.store.save_digest(
                            channel_id,
                            compressed.content,
                            DigestMeta {
                                token_count: compressed.token_count,
                                last_digested_at: Some(now.clone()),
                                last_compressed_at: Some(now),
                            },
                        )?;
                    }
                    Ok(None) => warn!(channel_id, "compressor returned no result"),
                    Err(e) => warn!(channel_id, error = %e, "compress call failed"),
                }
            }
        }

        Ok(())
    }

    /// Drop messages whose own thread is being handled via direct mention.
    fn filter_mention_tracked(&self, messages: &[ChannelMessage]) -> (Vec<ChannelMessage>, Vec<String>) {
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for msg in messages {
            let key = msg.thread_ts.as_deref().unwrap_or(msg.ts.as_str());
            if self.mentions.is_tracked(key) {
                dropped.push(msg.ts.clone());
            } else {
                kept.push(msg.clone());
            }
        }
        (kept, dropped)
    }

    async fn handle_reactions(
        &self,
        channel_id: &str,
        judge_result: &JudgeResult,
        pending_messages: &[ChannelMessage],
        outcome: &mut PipelineOutcome,
    ) -> Result<()> {
        let actions: Vec<InterventionAction> = judge_result
            .items
            .iter()
            .filter_map(InterventionAction::from_judge_item)
            .collect();

        let react_actions: Vec<&InterventionAction> =
            actions.iter().filter(|a| a.kind == ActionKind::React).collect();
        for action in &react_actions {
            if let Err(e) = self.transport.react(channel_id, &action.target, &action.content).await {
                warn!(channel_id, error = %e, "react action failed");
            }
        }
        outcome.react_actions = react_actions.into_iter().cloned().collect();

        let message_actions: Vec<&InterventionAction> =
            actions.iter().filter(|a| a.kind == ActionKind::Message).collect();
        if message_actions.is_empty() {
            return Ok(());
        }

        let max_item = judge_result
            .items
            .iter()
            .max_by_key(|item| item.importance);
        let importance = max_item.map(|i| i.importance).unwrap_or(5);

        let mut meta = self.store.get_intervention_meta(channel_id)?;
        let now = Utc::now();
        let mins_since = meta.minutes_since_last(now);
        let recent = meta.recent_count(now, self.config.recent_window_secs);
        let probability = intervention_probability(
            importance,
            mins_since,
            recent,
            self.config.intervention_threshold,
        );
        outcome.intervention_probability = Some(probability);

        if let Some(debug_channel) = &self.config.debug_channel {
            let text = format!(
                "intervention probability ({channel_id}): importance={} time_factor={:.3} freq_factor={:.3} probability={:.3} final_score={:.3} threshold={} passed={}",
                probability.importance,
                probability.time_factor,
                probability.freq_factor,
                probability.probability,
                probability.final_score,
                probability.threshold,
                probability.passed
            );
            let _ = self.transport.debug_log(debug_channel, &text).await;
        }

        let gated = match meta.state {
            InterventionState::Active { .. } => false,
            InterventionState::Idle => !probability.passed,
        };
        if gated || !meta.can_intervene(now, self.config.cooldown_secs) {
            return Ok(());
        }

        // At most one intervention per run: the item with maximum importance
        // among those that carry a `message` action.
        let intervene_item = judge_result
            .items
            .iter()
            .filter(|item| {
                message_actions
                    .iter()
                    .any(|a| InterventionAction::from_judge_item(item).map(|x| x.target == a.target).unwrap_or(false))
            })
            .max_by_key(|item| item.importance);

        let Some(intervene_item) = intervene_item else {
            return Ok(());
        };
        let Some(action) = InterventionAction::from_judge_item(intervene_item) else {
            return Ok(());
        };

        let response_text = self.compose_intervene_text(channel_id, &action, pending_messages, intervene_item.reasoning.as_deref()).await;
        let Some(response_text) = response_text else {
            return Ok(());
        };

        let thread_ts = if action.target == "channel" {
            None
        } else {
            Some(action.target.as_str())
        };
        match self.transport.post_message(channel_id, thread_ts, &response_text).await {
            Ok(()) => {
                meta.record(now, self.config.recent_window_secs);
                self.store.save_intervention_meta(channel_id, &meta)?;
                outcome.executed_intervention = Some(InterventionAction {
                    kind: ActionKind::Message,
                    target: action.target,
                    content: response_text,
                });
            }
            Err(e) => warn!(channel_id, error = %e, "intervene send failed"),
        }

        Ok(())
    }

    async fn compose_intervene_text(
        &self,
        channel_id: &str,
        action: &InterventionAction,
        pending_messages: &[ChannelMessage],
        observer_reason: Option<&str>,
    ) -> Option<String> {
        let Some(responder) = self.intervene_responder else {
            return Some(action.content.clone());
        };

        let (trigger, recent) = locate_trigger(pending_messages, &action.target);
        let digest = self.store.get_digest(channel_id).ok().flatten().map(|d| d.content);

        match responder
            .respond(digest.as_deref(), trigger, recent, &action.target, observer_reason)
            .await
        {
            Ok(Some(text)) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                warn!(channel_id, "intervene responder returned empty text");
                None
            }
            Err(e) => {
                warn!(channel_id, error = %e, "intervene responder failed");
                None
            }
        }
    }
}

/// Find the trigger message by `ts`, falling back to the last pending
/// message, with up to five messages of preceding context (mirrors the
/// original intervene-composition fallback).
fn locate_trigger<'m>(
    pending_messages: &'m [ChannelMessage],
    target_ts: &str,
) -> (Option<&'m ChannelMessage>, &'m [ChannelMessage]) {
    if target_ts != "channel" {
        if let Some(idx) = pending_messages.iter().position(|m| m.ts == target_ts) {
            let start = idx.saturating_sub(5);
            return (Some(&pending_messages[idx]), &pending_messages[start..idx]);
        }
    }
    match pending_messages.last() {
        Some(last) => {
            let len = pending_messages.len();
            let start = len.saturating_sub(6);
            (Some(last), &pending_messages[start..len - 1])
        }
        None => (None, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::intervention::InterventionMeta;

    fn msg(ts: &str, text: &str) -> ChannelMessage {
        ChannelMessage {
            ts: ts.to_string(),
            user: "U1".to_string(),
            text: text.to_string(),
            thread_ts: None,
        }
    }

    fn count_words(s: &str) -> u64 {
        s.split_whitespace().count() as u64
    }

    fn cfg() -> ChannelPipelineConfig {
        ChannelPipelineConfig {
            threshold_a: 2,
            threshold_b: 1000,
            digest_max_tokens: 10_000,
            digest_target_tokens: 5_000,
            intervention_threshold: 0.0,
            cooldown_secs: 600,
            recent_window_secs: 3600,
            debug_channel: None,
        }
    }

    struct NoopDigest;
    #[async_trait]
    impl DigestEngine for NoopDigest {
        async fn digest(&self, _: &str, _: Option<&str>, _: &[ChannelMessage]) -> anyhow::Result<Option<DigestCall>> {
            Ok(None)
        }
    }

    struct StaticJudge(JudgeResult);
    #[async_trait]
    impl Judge for StaticJudge {
        async fn judge(
            &self,
            _: &str,
            _: Option<&str>,
            _: &[ChannelMessage],
            _: &[ChannelMessage],
            _: &HashMap<String, Vec<ChannelMessage>>,
            _: Option<&str>,
        ) -> anyhow::Result<Option<JudgeResult>> {
            Ok(Some(self.0.clone()))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        reacted: Mutex<Vec<(String, String)>>,
        posted: Mutex<Vec<String>>,
    }
    #[async_trait]
    impl ChannelTransport for RecordingTransport {
        async fn react(&self, _channel_id: &str, ts: &str, emoji: &str) -> anyhow::Result<()> {
            self.reacted.lock().unwrap().push((ts.to_string(), emoji.to_string()));
            Ok(())
        }
        async fn post_message(&self, _channel_id: &str, _thread_ts: Option<&str>, text: &str) -> anyhow::Result<()> {
            self.posted.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn debug_log(&self, _debug_channel: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    use crate::types::{JudgeItem, ReactionType};

    #[tokio::test]
    async fn below_threshold_a_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChannelStore::new(tmp.path());
        store.append_pending("C1", &[msg("1.1", "hi")]).unwrap();

        let mentions = MentionTracker::new(Duration::from_secs(1800));
        let judge = StaticJudge(JudgeResult::default());
        let digest = NoopDigest;
        let transport = RecordingTransport::default();
        let pipeline = ChannelPipeline::new(
            &store, &mentions, cfg(), &count_words, &judge, &digest, None, None, &transport,
        );

        let outcome = pipeline.run("C1", None).await.unwrap();
        assert!(outcome.react_actions.is_empty());
        assert_eq!(store.load_pending("C1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn react_action_executes_unconditionally() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChannelStore::new(tmp.path());
        store
            .append_pending("C1", &[msg("1.1", "this is plenty of pending text")])
            .unwrap();

        let mentions = MentionTracker::new(Duration::from_secs(1800));
        let judge = StaticJudge(JudgeResult {
            items: vec![JudgeItem {
                ts: "1.1".into(),
                importance: 2,
                reaction_type: ReactionType::React,
                reaction_target: Some("1.1".into()),
                reaction_content: Some("eyes".into()),
                reasoning: None,
                emotion: None,
                addressed_to_me: false,
                related_to_me: false,
                is_instruction: false,
                context_meaning: None,
            }],
        });
        let digest = NoopDigest;
        let transport = RecordingTransport::default();
        let pipeline = ChannelPipeline::new(
            &store, &mentions, cfg(), &count_words, &judge, &digest, None, None, &transport,
        );

        let outcome = pipeline.run("C1", None).await.unwrap();
        assert_eq!(outcome.react_actions.len(), 1);
        assert_eq!(transport.reacted.lock().unwrap().len(), 1);
        assert!(store.load_pending("C1").unwrap().is_empty());
        assert_eq!(store.load_judged("C1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mention_tracked_thread_is_excluded_from_judge_but_still_progresses() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChannelStore::new(tmp.path());
        store
            .append_pending("C1", &[msg("1.1", "handled elsewhere already thanks")])
            .unwrap();

        let mentions = MentionTracker::new(Duration::from_secs(1800));
        mentions.mark("1.1");

        let judge = StaticJudge(JudgeResult::default());
        let digest = NoopDigest;
        let transport = RecordingTransport::default();
        let pipeline = ChannelPipeline::new(
            &store, &mentions, cfg(), &count_words, &judge, &digest, None, None, &transport,
        );

        pipeline.run("C1", None).await.unwrap();
        assert_eq!(store.load_judged("C1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn intervene_action_posts_when_probability_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChannelStore::new(tmp.path());
        store
            .append_pending("C1", &[msg("1.1", "are we really doing this again today")])
            .unwrap();

        let mentions = MentionTracker::new(Duration::from_secs(1800));
        let judge = StaticJudge(JudgeResult {
            items: vec![JudgeItem {
                ts: "1.1".into(),
                importance: 9,
                reaction_type: ReactionType::Intervene,
                reaction_target: Some("1.1".into()),
                reaction_content: Some("everything okay?".into()),
                reasoning: Some("tense exchange".into()),
                emotion: None,
                addressed_to_me: false,
                related_to_me: true,
                is_instruction: false,
                context_meaning: None,
            }],
        });
        let digest = NoopDigest;
        let transport = RecordingTransport::default();
        let pipeline = ChannelPipeline::new(
            &store, &mentions, cfg(), &count_words, &judge, &digest, None, None, &transport,
        );

        let outcome = pipeline.run("C1", None).await.unwrap();
        assert!(outcome.executed_intervention.is_some());
        assert_eq!(transport.posted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn active_state_intervenes_even_when_probability_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChannelStore::new(tmp.path());
        store
            .append_pending("C1", &[msg("1.1", "quick follow up question")])
            .unwrap();
        store
            .save_intervention_meta(
                "C1",
                &InterventionMeta {
                    state: InterventionState::Active {
                        remaining: 2,
                        started_at: Utc::now(),
                    },
                    last_intervention_at: Some(Utc::now()),
                    recent_log: vec![Utc::now(); 5],
                },
            )
            .unwrap();

        let mentions = MentionTracker::new(Duration::from_secs(1800));
        let judge = StaticJudge(JudgeResult {
            items: vec![JudgeItem {
                ts: "1.1".into(),
                importance: 1,
                reaction_type: ReactionType::Intervene,
                reaction_target: Some("1.1".into()),
                reaction_content: Some("got it".into()),
                reasoning: Some("low-stakes followup".into()),
                emotion: None,
                addressed_to_me: false,
                related_to_me: true,
                is_instruction: false,
                context_meaning: None,
            }],
        });
        let digest = NoopDigest;
        let transport = RecordingTransport::default();
        let mut high_threshold_cfg = cfg();
        high_threshold_cfg.intervention_threshold = 0.99;
        let pipeline = ChannelPipeline::new(
            &store, &mentions, high_threshold_cfg, &count_words, &judge, &digest, None, None, &transport,
        );

        let outcome = pipeline.run("C1", None).await.unwrap();
        assert!(!outcome.intervention_probability.unwrap().passed);
        assert!(outcome.executed_intervention.is_some());
        assert_eq!(transport.posted.lock().unwrap().len(), 1);
    }
}
