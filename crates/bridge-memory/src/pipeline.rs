//! Observational memory pipeline (§4.5): per-turn observe, reflection,
//! cross-session promotion, persistent-memory compaction.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::ids::{generate_ltm_id, generate_obs_id};
use crate::store::MemoryStore;
use crate::types::{Candidate, MemoryRecord, ObservationItem, ObservationSource, PersistentItem, Priority};

/// A proposed observation before an ID has been assigned.
#[derive(Debug, Clone)]
pub struct ProposedObservation {
    pub priority: Priority,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ObserveOutput {
    pub observations: Vec<ProposedObservation>,
    pub candidates: Vec<Candidate>,
}

/// A proposed persistent item. `id` is `Some` when the promoter intends to
/// update an existing long-term memory in place, `None` for a new entry.
#[derive(Debug, Clone)]
pub struct ProposedPersistent {
    pub id: Option<String>,
    pub priority: Priority,
    pub content: String,
    pub source_obs_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PromoteOutput {
    pub promoted: Vec<ProposedPersistent>,
    pub rejected: Vec<Value>,
}

/// Per-turn observer: derives structured observations and long-term-memory
/// candidates from a session's existing observations plus new messages.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn observe(
        &self,
        existing: &[ObservationItem],
        messages: &[Value],
    ) -> anyhow::Result<ObserveOutput>;
}

/// Compresses a session's observations in place once they exceed the
/// reflection threshold.
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, observations: &[ObservationItem]) -> anyhow::Result<Vec<ObservationItem>>;
}

/// Merges accumulated candidates (across all sessions) into persistent
/// memory.
#[async_trait]
pub trait Promoter: Send + Sync {
    async fn promote(
        &self,
        all_candidates: &[Value],
        existing_persistent: &[PersistentItem],
    ) -> anyhow::Result<PromoteOutput>;
}

/// Compresses persistent memory down to a target token budget.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(
        &self,
        persistent: &[PersistentItem],
        target_tokens: u64,
    ) -> anyhow::Result<Vec<PersistentItem>>;
}

#[derive(Debug, Clone)]
pub struct OMPipelineConfig {
    pub min_turn_tokens: u64,
    pub reflection_threshold: u64,
    pub promotion_threshold: u64,
    pub compaction_threshold: u64,
    pub compaction_target_tokens: u64,
}

impl Default for OMPipelineConfig {
    fn default() -> Self {
        Self {
            min_turn_tokens: 50,
            reflection_threshold: 4_000,
            promotion_threshold: 6_000,
            compaction_threshold: 8_000,
            compaction_target_tokens: 3_000,
        }
    }
}

pub struct OMPipeline<'a> {
    store: &'a MemoryStore,
    config: OMPipelineConfig,
    observer: &'a dyn Observer,
    reflector: &'a dyn Reflector,
    promoter: &'a dyn Promoter,
    compactor: &'a dyn Compactor,
    count_tokens: &'a dyn Fn(&str) -> u64,
}

impl<'a> OMPipeline<'a> {
    pub fn new(
        store: &'a MemoryStore,
        config: OMPipelineConfig,
        observer: &'a dyn Observer,
        reflector: &'a dyn Reflector,
        promoter: &'a dyn Promoter,
        compactor: &'a dyn Compactor,
        count_tokens: &'a dyn Fn(&str) -> u64,
    ) -> Self {
        Self {
            store,
            config,
            observer,
            reflector,
            promoter,
            compactor,
            count_tokens,
        }
    }

    /// §4.5.1 — run once per engine round-trip, after a successful result.
    pub async fn run_turn(
        &self,
        thread_ts: &str,
        user_id: &str,
        username: &str,
        messages: &[Value],
    ) -> Result<()> {
        let turn_tokens: u64 = messages
            .iter()
            .map(|m| (self.count_tokens)(m.get("content").and_then(|v| v.as_str()).unwrap_or("")))
            .sum();
        if turn_tokens < self.config.min_turn_tokens {
            return Ok(());
        }

        let mut record = self.store.get_record(thread_ts)?.unwrap_or_else(|| MemoryRecord {
            thread_ts: thread_ts.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            created_at: Utc::now().to_rfc3339(),
            ..Default::default()
        });

        let observed = match self.observer.observe(&record.observations, messages).await {
            Ok(o) => o,
            Err(e) => {
                warn!(thread_ts, error = %e, "observer call failed, skipping this turn");
                return Ok(());
            }
        };

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let now_iso = Utc::now().to_rfc3339();
        let mut new_items = Vec::new();
        for proposed in observed.observations {
            let existing_ids: Vec<&str> = record
                .observations
                .iter()
                .chain(new_items.iter())
                .map(|i: &ObservationItem| i.id.as_str())
                .collect();
            let id = generate_obs_id(&existing_ids, &today);
            new_items.push(ObservationItem {
                id,
                priority: proposed.priority,
                content: proposed.content,
                session_date: today.clone(),
                created_at: now_iso.clone(),
                source: ObservationSource::Observer,
            });
        }

        record.observations.extend(new_items.clone());
        record.observation_tokens += turn_tokens;
        record.last_observed_at = Some(now_iso);
        record.total_sessions_observed += 1;

        self.store.save_record(&record)?;
        self.store.save_new_observations(thread_ts, &new_items)?;
        self.store.set_inject_flag(thread_ts)?;

        if !observed.candidates.is_empty() {
            let values: Vec<Value> = observed
                .candidates
                .iter()
                .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
                .collect();
            self.store.append_candidates(thread_ts, &values)?;
        }

        self.reflect_if_needed(thread_ts, &mut record).await?;
        self.promote_if_needed().await?;

        Ok(())
    }

    /// §4.5.2 — per-session compaction of observations.
    async fn reflect_if_needed(&self, thread_ts: &str, record: &mut MemoryRecord) -> Result<()> {
        if record.observation_tokens <= self.config.reflection_threshold {
            return Ok(());
        }
        match self.reflector.reflect(&record.observations).await {
            Ok(compressed) => {
                record.observations = compressed;
                record.observation_tokens = record
                    .observations
                    .iter()
                    .map(|o| (self.count_tokens)(&o.content))
                    .sum();
                record.reflection_count += 1;
                self.store.save_record(record)?;
                info!(thread_ts, "reflected session observations");
            }
            Err(e) => warn!(thread_ts, error = %e, "reflector call failed, skipping"),
        }
        Ok(())
    }

    /// §4.5.3 — cross-session promotion into persistent memory, then
    /// §4.5.4 — compaction of persistent memory if it grew too large.
    async fn promote_if_needed(&self) -> Result<()> {
        let total_candidate_tokens = self
            .store
            .count_all_candidate_tokens(|s| (self.count_tokens)(s))?;
        if total_candidate_tokens <= self.config.promotion_threshold {
            return Ok(());
        }

        let all_candidates = self.store.load_all_candidates()?;
        let (existing_persistent, meta) = self.store.get_persistent()?.unwrap_or_default();

        let output = match self.promoter.promote(&all_candidates, &existing_persistent).await {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "promoter call failed, candidates left untouched");
                return Ok(());
            }
        };

        if output.promoted.is_empty() {
            return Ok(());
        }

        let mut merged = existing_persistent;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let now_iso = Utc::now().to_rfc3339();
        for draft in output.promoted {
            let id = match draft.id {
                Some(id) => id,
                None => {
                    let existing_ids: Vec<&str> = merged.iter().map(|p| p.id.as_str()).collect();
                    generate_ltm_id(&existing_ids, &today)
                }
            };
            let item = PersistentItem {
                id: id.clone(),
                priority: draft.priority,
                content: draft.content,
                promoted_at: now_iso.clone(),
                source_obs_ids: draft.source_obs_ids,
            };
            if let Some(existing) = merged.iter_mut().find(|p| p.id == id) {
                *existing = item;
            } else {
                merged.push(item);
            }
        }

        // Promotion commit is atomic: archive-then-write persistent, then
        // (and only then) clear every session's candidate buffer.
        self.store.archive_persistent()?;
        self.store.save_persistent(&merged, &meta)?;
        self.store.clear_all_candidates()?;
        info!(promoted = merged.len(), "promoted candidates into persistent memory");

        self.compact_if_needed(&merged, &meta).await?;
        Ok(())
    }

    async fn compact_if_needed(&self, persistent: &[PersistentItem], meta: &Value) -> Result<()> {
        let total_tokens: u64 = persistent.iter().map(|p| (self.count_tokens)(&p.content)).sum();
        if total_tokens <= self.config.compaction_threshold {
            return Ok(());
        }

        match self
            .compactor
            .compact(persistent, self.config.compaction_target_tokens)
            .await
        {
            Ok(compacted) => {
                self.store.archive_persistent()?;
                self.store.save_persistent(&compacted, meta)?;
                info!(
                    before = persistent.len(),
                    after = compacted.len(),
                    "compacted persistent memory"
                );
            }
            Err(e) => warn!(error = %e, "compactor call failed, persistent memory left as-is"),
        }
        Ok(())
    }
}
