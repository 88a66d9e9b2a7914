use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, instrument, warn};

use bridge_core::types::{ChannelId, SlackUserId, SourceType, ThreadTs, UserRole};

use crate::error::{Result, SessionError};
use crate::types::Session;

/// File-backed session store: one JSON file per session under `dir`, an
/// in-memory cache guarded by a single lock in front of it (§4.1).
///
/// This generalizes the cache-then-disk idiom of a SQLite-backed session
/// manager to plain files: the lock still serializes every mutation, only
/// the "connection" underneath it changed shape.
pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<ThreadTs, Session>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, thread_ts: &ThreadTs) -> PathBuf {
        self.dir.join(format!("session_{}.json", thread_ts.as_str()))
    }

    /// Return an existing session, or create and persist a new one.
    #[instrument(skip(self), fields(thread_ts = %thread_ts))]
    pub fn get_or_create(
        &self,
        thread_ts: &ThreadTs,
        channel_id: &ChannelId,
        user_id: &SlackUserId,
        username: &str,
        role: UserRole,
        source_type: SourceType,
    ) -> Result<Session> {
        if let Some(session) = self.get(thread_ts)? {
            debug!("session cache hit");
            return Ok(session);
        }

        let session = Session::new(
            thread_ts.clone(),
            channel_id.clone(),
            user_id.clone(),
            username,
            role,
            source_type,
        );
        self.save(&session)?;
        Ok(session)
    }

    /// Look up a session by thread_ts. A corrupted file is logged and
    /// skipped rather than propagated — `None` is returned as if the
    /// session never existed, per §8's boundary behavior.
    #[instrument(skip(self), fields(thread_ts = %thread_ts))]
    pub fn get(&self, thread_ts: &ThreadTs) -> Result<Option<Session>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(s) = cache.get(thread_ts) {
                return Ok(Some(s.clone()));
            }
        }

        let path = self.path_for(thread_ts);
        if !path.exists() {
            return Ok(None);
        }

        match load_session_file(&path) {
            Ok(session) => {
                self.cache
                    .lock()
                    .unwrap()
                    .insert(thread_ts.clone(), session.clone());
                Ok(Some(session))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping corrupt session file");
                Ok(None)
            }
        }
    }

    /// Persist `session`, updating both the on-disk file (atomically) and
    /// the in-memory cache.
    #[instrument(skip(self, session), fields(thread_ts = %session.thread_ts))]
    pub fn save(&self, session: &Session) -> Result<()> {
        let path = self.path_for(&session.thread_ts);
        write_session_file(&path, session)?;
        self.cache
            .lock()
            .unwrap()
            .insert(session.thread_ts.clone(), session.clone());
        Ok(())
    }

    /// List every session whose file parses successfully, skipping (and
    /// logging) any that don't — a corrupt file never poisons the listing.
    #[instrument(skip(self))]
    pub fn list_active(&self) -> Result<Vec<Session>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_session_file(&path) {
                Ok(session) => out.push(session),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt session file");
                }
            }
        }
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(out)
    }

    /// Permanently remove a session's file and cache entry.
    pub fn delete(&self, thread_ts: &ThreadTs) -> Result<()> {
        let path = self.path_for(thread_ts);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.cache.lock().unwrap().remove(thread_ts);
        Ok(())
    }

    /// Number of sessions currently on disk (§4.1).
    pub fn count(&self) -> Result<usize> {
        Ok(self.list_active()?.len())
    }

    /// Rotate the engine session id (e.g. after compaction).
    #[instrument(skip(self), fields(thread_ts = %thread_ts))]
    pub fn update_session_id(&self, thread_ts: &ThreadTs, new_session_id: impl Into<String>) -> Result<()> {
        self.mutate(thread_ts, |s| s.rotate_session_id(new_session_id))
    }

    /// Record the transport timestamp of the most recent channel-side
    /// message already folded into this session (§4.5.5's followup fold).
    #[instrument(skip(self), fields(thread_ts = %thread_ts))]
    pub fn update_last_seen_ts(&self, thread_ts: &ThreadTs, last_seen_ts: impl Into<String>) -> Result<()> {
        self.mutate(thread_ts, |s| {
            s.last_seen_ts = Some(last_seen_ts.into());
        })
    }

    /// Update the Slack identity bound to a session (a user's display name
    /// can change between turns).
    #[instrument(skip(self, username), fields(thread_ts = %thread_ts))]
    pub fn update_user(&self, thread_ts: &ThreadTs, user_id: &SlackUserId, username: &str) -> Result<()> {
        self.mutate(thread_ts, |s| {
            s.user_id = user_id.clone();
            s.username = username.to_string();
        })
    }

    /// Advance `message_count` after a completed engine round-trip.
    #[instrument(skip(self), fields(thread_ts = %thread_ts))]
    pub fn increment_message_count(&self, thread_ts: &ThreadTs) -> Result<()> {
        self.mutate(thread_ts, |s| s.record_turn())
    }

    /// Delete every session whose `updated_at` is older than
    /// `threshold_hours`. Returns the number removed.
    #[instrument(skip(self))]
    pub fn cleanup_old(&self, threshold_hours: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(threshold_hours);
        let mut removed = 0;
        for session in self.list_active()? {
            let updated_at = chrono::DateTime::parse_from_rfc3339(&session.updated_at)
                .map(|dt| dt.with_timezone(&chrono::Utc));
            let stale = match updated_at {
                Ok(dt) => dt < cutoff,
                Err(_) => false,
            };
            if stale {
                self.delete(&session.thread_ts)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Load a session, apply `f`, and persist the result. Fails with
    /// `NotFound` rather than silently creating one.
    fn mutate(&self, thread_ts: &ThreadTs, f: impl FnOnce(&mut Session)) -> Result<()> {
        let mut session = self.get(thread_ts)?.ok_or_else(|| SessionError::NotFound {
            thread_ts: thread_ts.as_str().to_string(),
        })?;
        f(&mut session);
        self.save(&session)
    }
}

fn load_session_file(path: &Path) -> Result<Session> {
    let data = std::fs::read_to_string(path).map_err(SessionError::Io)?;
    serde_json::from_str(&data).map_err(|e| SessionError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_session_file(path: &Path, session: &Session) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    let body = serde_json::to_vec_pretty(session)?;
    tmp.write_all(&body)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| SessionError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(ts: &str) -> Session {
        Session::new(
            ThreadTs::from(ts),
            ChannelId::from("C1"),
            SlackUserId::from("U1"),
            "alice",
            UserRole::Viewer,
            SourceType::Thread,
        )
    }

    #[test]
    fn save_then_load_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let session = test_session("100.1");
        store.save(&session).unwrap();

        let loaded = store.get(&session.thread_ts).unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let ts = ThreadTs::from("200.1");
        let a = store
            .get_or_create(
                &ts,
                &ChannelId::from("C1"),
                &SlackUserId::from("U1"),
                "alice",
                UserRole::Viewer,
                SourceType::Thread,
            )
            .unwrap();
        let b = store
            .get_or_create(
                &ts,
                &ChannelId::from("C1"),
                &SlackUserId::from("U1"),
                "alice",
                UserRole::Viewer,
                SourceType::Thread,
            )
            .unwrap();
        assert_eq!(a.created_at, b.created_at);
    }

    #[test]
    fn corrupt_file_is_skipped_not_propagated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("session_bad.1.json"), "{not json").unwrap();
        assert!(store.get(&ThreadTs::from("bad.1")).unwrap().is_none());
        assert!(store.list_active().unwrap().is_empty());
    }

    #[test]
    fn list_active_sorted_and_skips_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        store.save(&test_session("1.1")).unwrap();
        store.save(&test_session("2.1")).unwrap();
        std::fs::write(tmp.path().join("session_3.1.json"), "{not json").unwrap();

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn count_matches_list_active_len() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        store.save(&test_session("1.1")).unwrap();
        store.save(&test_session("2.1")).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn update_last_seen_ts_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let session = test_session("1.1");
        store.save(&session).unwrap();

        store.update_last_seen_ts(&session.thread_ts, "5.5").unwrap();
        let reloaded = store.get(&session.thread_ts).unwrap().unwrap();
        assert_eq!(reloaded.last_seen_ts.as_deref(), Some("5.5"));
    }

    #[test]
    fn update_session_id_rotates_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let session = test_session("1.1");
        store.save(&session).unwrap();

        store.update_session_id(&session.thread_ts, "sess-a").unwrap();
        let reloaded = store.get(&session.thread_ts).unwrap().unwrap();
        assert_eq!(reloaded.session_id.as_deref(), Some("sess-a"));
    }

    #[test]
    fn update_user_changes_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let session = test_session("1.1");
        store.save(&session).unwrap();

        store
            .update_user(&session.thread_ts, &SlackUserId::from("U2"), "bob")
            .unwrap();
        let reloaded = store.get(&session.thread_ts).unwrap().unwrap();
        assert_eq!(reloaded.user_id.as_str(), "U2");
        assert_eq!(reloaded.username, "bob");
    }

    #[test]
    fn increment_message_count_advances_by_one() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let session = test_session("1.1");
        store.save(&session).unwrap();

        store.increment_message_count(&session.thread_ts).unwrap();
        store.increment_message_count(&session.thread_ts).unwrap();
        let reloaded = store.get(&session.thread_ts).unwrap().unwrap();
        assert_eq!(reloaded.message_count, 2);
    }

    #[test]
    fn mutate_on_missing_session_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let err = store.update_last_seen_ts(&ThreadTs::from("missing.1"), "1.1").unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[test]
    fn cleanup_old_removes_stale_sessions_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path()).unwrap();
        let mut stale = test_session("1.1");
        stale.updated_at = (chrono::Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        store.save(&stale).unwrap();
        store.save(&test_session("2.1")).unwrap();

        let removed = store.cleanup_old(24).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&ThreadTs::from("1.1")).unwrap().is_none());
        assert!(store.get(&ThreadTs::from("2.1")).unwrap().is_some());
    }
}
