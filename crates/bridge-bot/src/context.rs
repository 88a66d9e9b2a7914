//! `ContextInjector` implementation (§4.5.5 read path): assembles the
//! long-term/session/channel injection block for a thread ahead of a run,
//! using the caller's thread-to-channel mapping since `ContextBuilder`
//! itself is scoped by `thread_ts` and knows nothing about Slack channels.

use std::sync::Arc;

use async_trait::async_trait;

use bridge_channel_observer::ChannelStore;
use bridge_core::types::ThreadTs;
use bridge_memory::context::{ChannelObservationBlock, ContextBuilder};
use bridge_memory::MemoryStore;
use bridge_sessions::SessionStore;
use bridge_slack::ContextInjector;

use crate::tokens::approx_token_count;

pub struct BridgeContextInjector {
    memory: Arc<MemoryStore>,
    sessions: Arc<SessionStore>,
    channels: Arc<ChannelStore>,
    token_budget: u64,
}

impl BridgeContextInjector {
    pub fn new(memory: Arc<MemoryStore>, sessions: Arc<SessionStore>, channels: Arc<ChannelStore>, token_budget: u64) -> Self {
        Self {
            memory,
            sessions,
            channels,
            token_budget,
        }
    }
}

#[async_trait]
impl ContextInjector for BridgeContextInjector {
    async fn build_context(&self, thread_ts: &str) -> Option<String> {
        let channel_block = self
            .sessions
            .get(&ThreadTs(thread_ts.to_string()))
            .ok()
            .flatten()
            .and_then(|session| self.channels.get_digest(session.channel_id.as_str()).ok().flatten())
            .map(|digest| ChannelObservationBlock {
                digest: Some(digest.content),
                recent_channel: Vec::new(),
                recent_thread: Vec::new(),
            });

        let builder = ContextBuilder::new(&self.memory, self.token_budget, &approx_token_count);
        builder.build(thread_ts, channel_block.as_ref()).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use bridge_core::types::{SourceType, UserRole};
    use bridge_memory::types::{Priority, PersistentItem};

    use super::*;

    #[tokio::test]
    async fn returns_none_with_no_memory_recorded() {
        let memory_dir = tempfile::tempdir().unwrap();
        let sessions_dir = tempfile::tempdir().unwrap();
        let channels_dir = tempfile::tempdir().unwrap();
        let injector = BridgeContextInjector::new(
            Arc::new(MemoryStore::new(memory_dir.path())),
            Arc::new(SessionStore::new(sessions_dir.path()).unwrap()),
            Arc::new(ChannelStore::new(channels_dir.path())),
            1_000,
        );

        assert_eq!(injector.build_context("t1").await, None);
    }

    #[tokio::test]
    async fn surfaces_long_term_memory_for_any_thread() {
        let memory_dir = tempfile::tempdir().unwrap();
        let sessions_dir = tempfile::tempdir().unwrap();
        let channels_dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(memory_dir.path()));
        memory
            .save_persistent(
                &[PersistentItem {
                    id: "p1".to_string(),
                    priority: Priority::High,
                    content: "prefers terse replies".to_string(),
                    promoted_at: "2026-01-01T00:00:00Z".to_string(),
                    source_obs_ids: vec![],
                }],
                &serde_json::json!({}),
            )
            .unwrap();

        let sessions = Arc::new(SessionStore::new(sessions_dir.path()).unwrap());
        sessions
            .get_or_create(&"t1".into(), &"C1".into(), &"U1".into(), "alice", UserRole::Viewer, SourceType::Thread)
            .unwrap();

        let injector = BridgeContextInjector::new(memory, sessions, Arc::new(ChannelStore::new(channels_dir.path())), 1_000);

        let context = injector.build_context("t1").await.unwrap();
        assert!(context.contains("prefers terse replies"));
    }
}
