use serde::{Deserialize, Serialize};

use bridge_core::types::{ChannelId, EngineSessionId, SlackUserId, SourceType, ThreadTs, UserRole};

/// A persisted conversation session (§3.1).
///
/// Exactly one `Session` exists per `thread_ts`; only the executor, under
/// the per-thread execution lock, may advance `message_count` or
/// `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub thread_ts: ThreadTs,
    pub channel_id: ChannelId,
    pub user_id: SlackUserId,
    pub username: String,
    pub role: UserRole,
    #[serde(default)]
    pub session_id: EngineSessionId,
    #[serde(default)]
    pub message_count: u32,
    pub source_type: SourceType,
    /// Transport timestamp of the most recent channel-side message already
    /// folded into this session.
    pub last_seen_ts: Option<String>,
    /// Anchor thread_ts for the OM debug thread, if one has been created.
    #[serde(default)]
    pub debug_anchor_ts: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    pub fn new(
        thread_ts: ThreadTs,
        channel_id: ChannelId,
        user_id: SlackUserId,
        username: impl Into<String>,
        role: UserRole,
        source_type: SourceType,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            thread_ts,
            channel_id,
            user_id,
            username: username.into(),
            role,
            session_id: EngineSessionId::empty(),
            message_count: 0,
            source_type,
            last_seen_ts: None,
            debug_anchor_ts: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Rotate the engine session id (e.g. after a compaction). Never splits
    /// the session — only replaces the value in place.
    pub fn rotate_session_id(&mut self, new_id: impl Into<String>) {
        self.session_id = EngineSessionId(Some(new_id.into()));
        self.touch();
    }

    pub fn record_turn(&mut self) {
        self.message_count += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_unassigned_session_id() {
        let s = Session::new(
            ThreadTs::from("1.1"),
            ChannelId::from("C1"),
            SlackUserId::from("U1"),
            "alice",
            UserRole::Viewer,
            SourceType::Thread,
        );
        assert!(!s.session_id.is_assigned());
        assert_eq!(s.message_count, 0);
    }

    #[test]
    fn rotate_replaces_value_in_place() {
        let mut s = Session::new(
            ThreadTs::from("1.1"),
            ChannelId::from("C1"),
            SlackUserId::from("U1"),
            "alice",
            UserRole::Viewer,
            SourceType::Thread,
        );
        s.rotate_session_id("sess-a");
        assert_eq!(s.session_id.as_deref(), Some("sess-a"));
        s.rotate_session_id("sess-b");
        assert_eq!(s.session_id.as_deref(), Some("sess-b"));
    }
}
