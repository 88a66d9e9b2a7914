use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{MemoryError, Result};
use crate::markdown::{parse_md_observations, parse_md_persistent};
use crate::types::{
    MemoryRecord, MemoryRecordMetaWire, ObservationItem, ObservationItemWire, PersistentItem,
    PersistentItemWire,
};

/// File-based store for observation logs, pending buffers, conversation
/// transcripts, long-term-memory candidates, and persistent memory (§6).
///
/// Every mutating operation on a given logical file is guarded by an OS
/// advisory lock on a neighboring `.lock` file, matching the `filelock`
/// discipline used per (session, file-type) pair.
pub struct MemoryStore {
    base_dir: PathBuf,
}

impl MemoryStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn observations_dir(&self) -> PathBuf {
        self.base_dir.join("observations")
    }
    fn pending_dir(&self) -> PathBuf {
        self.base_dir.join("pending")
    }
    fn conversations_dir(&self) -> PathBuf {
        self.base_dir.join("conversations")
    }
    fn candidates_dir(&self) -> PathBuf {
        self.base_dir.join("candidates")
    }
    fn persistent_dir(&self) -> PathBuf {
        self.base_dir.join("persistent")
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.observations_dir(),
            self.pending_dir(),
            self.conversations_dir(),
            self.candidates_dir(),
            self.persistent_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    // -- observations --------------------------------------------------

    fn obs_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir().join(format!("{thread_ts}.json"))
    }
    fn obs_md_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir().join(format!("{thread_ts}.md"))
    }
    fn meta_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir()
            .join(format!("{thread_ts}.meta.json"))
    }
    fn lock_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir().join(format!("{thread_ts}.lock"))
    }

    /// Load a session's observation record, migrating a legacy `.md` file
    /// to `.json` on first read if no `.json` exists yet.
    pub fn get_record(&self, thread_ts: &str) -> Result<Option<MemoryRecord>> {
        let meta_path = self.meta_path(thread_ts);
        if !meta_path.exists() {
            return Ok(None);
        }

        self.ensure_dirs()?;
        let _guard = LockGuard::acquire(&self.lock_path(thread_ts))?;

        let meta_data = fs::read_to_string(&meta_path)?;
        let meta: MemoryRecordMetaWire =
            serde_json::from_str(&meta_data).map_err(|e| MemoryError::Corrupt {
                path: meta_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let obs_path = self.obs_path(thread_ts);
        let obs_md_path = self.obs_md_path(thread_ts);

        let observations: Vec<ObservationItem> = if obs_path.exists() {
            let data = fs::read_to_string(&obs_path)?;
            let wire: Vec<ObservationItemWire> =
                serde_json::from_str(&data).map_err(|e| MemoryError::Corrupt {
                    path: obs_path.display().to_string(),
                    reason: e.to_string(),
                })?;
            wire.into_iter().map(Into::into).collect()
        } else if obs_md_path.exists() {
            let md_text = fs::read_to_string(&obs_md_path)?;
            let migrated = parse_md_observations(&md_text);
            let wire: Vec<ObservationItemWire> = migrated.iter().map(Into::into).collect();
            write_json_atomic(&obs_path, &wire)?;
            fs::remove_file(&obs_md_path)?;
            info!(thread_ts, "migrated observation log .md -> .json");
            migrated
        } else {
            Vec::new()
        };

        Ok(Some(MemoryRecord {
            thread_ts: meta.thread_ts,
            user_id: meta.user_id,
            username: meta.username,
            observations,
            observation_tokens: meta.observation_tokens,
            last_observed_at: meta.last_observed_at,
            total_sessions_observed: meta.total_sessions_observed,
            reflection_count: meta.reflection_count,
            anchor_ts: meta.anchor_ts,
            created_at: meta.created_at,
        }))
    }

    pub fn save_record(&self, record: &MemoryRecord) -> Result<()> {
        self.ensure_dirs()?;
        let _guard = LockGuard::acquire(&self.lock_path(&record.thread_ts))?;

        let wire: Vec<ObservationItemWire> = record.observations.iter().map(Into::into).collect();
        write_json_atomic(&self.obs_path(&record.thread_ts), &wire)?;

        let meta = MemoryRecordMetaWire {
            thread_ts: record.thread_ts.clone(),
            user_id: record.user_id.clone(),
            username: record.username.clone(),
            observation_tokens: record.observation_tokens,
            last_observed_at: record.last_observed_at.clone(),
            total_sessions_observed: record.total_sessions_observed,
            reflection_count: record.reflection_count,
            anchor_ts: record.anchor_ts.clone(),
            created_at: record.created_at.clone(),
        };
        write_json_atomic(&self.meta_path(&record.thread_ts), &meta)?;
        Ok(())
    }

    // -- pending conversation buffer ------------------------------------

    fn pending_path(&self, thread_ts: &str) -> PathBuf {
        self.pending_dir().join(format!("{thread_ts}.jsonl"))
    }
    fn pending_lock_path(&self, thread_ts: &str) -> PathBuf {
        self.pending_dir().join(format!("{thread_ts}.lock"))
    }

    pub fn append_pending_messages(&self, thread_ts: &str, messages: &[Value]) -> Result<()> {
        self.ensure_dirs()?;
        let _guard = LockGuard::acquire(&self.pending_lock_path(thread_ts))?;
        append_jsonl(&self.pending_path(thread_ts), messages)
    }

    pub fn load_pending_messages(&self, thread_ts: &str) -> Result<Vec<Value>> {
        let path = self.pending_path(thread_ts);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let _guard = LockGuard::acquire(&self.pending_lock_path(thread_ts))?;
        read_jsonl(&path)
    }

    pub fn clear_pending_messages(&self, thread_ts: &str) -> Result<()> {
        let path = self.pending_path(thread_ts);
        if path.exists() {
            let _guard = LockGuard::acquire(&self.pending_lock_path(thread_ts))?;
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    // -- per-turn new observations (for next-turn injection) ------------

    fn new_obs_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir().join(format!("{thread_ts}.new.json"))
    }
    fn new_obs_md_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir().join(format!("{thread_ts}.new.md"))
    }

    pub fn save_new_observations(&self, thread_ts: &str, items: &[ObservationItem]) -> Result<()> {
        self.ensure_dirs()?;
        let wire: Vec<ObservationItemWire> = items.iter().map(Into::into).collect();
        write_json_atomic(&self.new_obs_path(thread_ts), &wire)
    }

    pub fn get_new_observations(&self, thread_ts: &str) -> Result<Vec<ObservationItem>> {
        let path = self.new_obs_path(thread_ts);
        if path.exists() {
            let data = fs::read_to_string(&path)?;
            let wire: Vec<ObservationItemWire> = serde_json::from_str(&data)?;
            return Ok(wire.into_iter().map(Into::into).collect());
        }
        let md_path = self.new_obs_md_path(thread_ts);
        if md_path.exists() {
            let md_text = fs::read_to_string(&md_path)?;
            let items = parse_md_observations(&md_text);
            fs::remove_file(&md_path)?;
            return Ok(items);
        }
        Ok(Vec::new())
    }

    pub fn clear_new_observations(&self, thread_ts: &str) -> Result<()> {
        for path in [self.new_obs_path(thread_ts), self.new_obs_md_path(thread_ts)] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    // -- injection flag ---------------------------------------------------

    fn inject_flag_path(&self, thread_ts: &str) -> PathBuf {
        self.observations_dir().join(format!("{thread_ts}.inject"))
    }

    pub fn set_inject_flag(&self, thread_ts: &str) -> Result<()> {
        self.ensure_dirs()?;
        fs::write(self.inject_flag_path(thread_ts), "1")?;
        Ok(())
    }

    pub fn check_and_clear_inject_flag(&self, thread_ts: &str) -> Result<bool> {
        let path = self.inject_flag_path(thread_ts);
        if path.exists() {
            fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }

    // -- conversation transcript -----------------------------------------

    fn conv_path(&self, thread_ts: &str) -> PathBuf {
        self.conversations_dir().join(format!("{thread_ts}.jsonl"))
    }

    pub fn save_conversation(&self, thread_ts: &str, messages: &[Value]) -> Result<()> {
        self.ensure_dirs()?;
        write_jsonl(&self.conv_path(thread_ts), messages)
    }

    pub fn load_conversation(&self, thread_ts: &str) -> Result<Option<Vec<Value>>> {
        let path = self.conv_path(thread_ts);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_jsonl(&path)?))
    }

    // -- long-term memory candidates --------------------------------------

    fn candidates_path(&self, thread_ts: &str) -> PathBuf {
        self.candidates_dir().join(format!("{thread_ts}.jsonl"))
    }
    fn candidates_lock_path(&self, thread_ts: &str) -> PathBuf {
        self.candidates_dir().join(format!("{thread_ts}.lock"))
    }

    pub fn append_candidates(&self, thread_ts: &str, entries: &[Value]) -> Result<()> {
        self.ensure_dirs()?;
        let _guard = LockGuard::acquire(&self.candidates_lock_path(thread_ts))?;
        append_jsonl(&self.candidates_path(thread_ts), entries)
    }

    pub fn load_candidates(&self, thread_ts: &str) -> Result<Vec<Value>> {
        let path = self.candidates_path(thread_ts);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let _guard = LockGuard::acquire(&self.candidates_lock_path(thread_ts))?;
        read_jsonl(&path)
    }

    pub fn load_all_candidates(&self) -> Result<Vec<Value>> {
        let dir = self.candidates_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .collect();
        paths.sort();

        let mut all = Vec::new();
        for path in paths {
            all.extend(read_jsonl(&path)?);
        }
        Ok(all)
    }

    /// Sum `content`-field token counts across every session's candidates,
    /// using the caller-supplied counter (kept external since token
    /// counting is a leaf concern shared with the executor/engine crates).
    pub fn count_all_candidate_tokens(&self, count_str: impl Fn(&str) -> u64) -> Result<u64> {
        let candidates = self.load_all_candidates()?;
        Ok(candidates
            .iter()
            .map(|c| count_str(c.get("content").and_then(|v| v.as_str()).unwrap_or("")))
            .sum())
    }

    pub fn clear_all_candidates(&self) -> Result<()> {
        let dir = self.candidates_dir();
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("jsonl") | Some("lock") => fs::remove_file(path)?,
                _ => {}
            }
        }
        Ok(())
    }

    // -- persistent (long-term) memory ------------------------------------

    fn persistent_content_path(&self) -> PathBuf {
        self.persistent_dir().join("recent.json")
    }
    fn persistent_md_path(&self) -> PathBuf {
        self.persistent_dir().join("recent.md")
    }
    fn persistent_meta_path(&self) -> PathBuf {
        self.persistent_dir().join("recent.meta.json")
    }
    fn persistent_lock_path(&self) -> PathBuf {
        self.persistent_dir().join("recent.lock")
    }
    fn persistent_archive_dir(&self) -> PathBuf {
        self.persistent_dir().join("archive")
    }

    pub fn get_persistent(&self) -> Result<Option<(Vec<PersistentItem>, Value)>> {
        let content_path = self.persistent_content_path();
        let md_path = self.persistent_md_path();

        if !content_path.exists() && !md_path.exists() {
            return Ok(None);
        }

        self.ensure_dirs()?;
        let _guard = LockGuard::acquire(&self.persistent_lock_path())?;

        let content: Vec<PersistentItem> = if content_path.exists() {
            let data = fs::read_to_string(&content_path)?;
            let wire: Vec<PersistentItemWire> =
                serde_json::from_str(&data).map_err(|e| MemoryError::Corrupt {
                    path: content_path.display().to_string(),
                    reason: e.to_string(),
                })?;
            wire.into_iter().map(Into::into).collect()
        } else {
            let md_text = fs::read_to_string(&md_path)?;
            let migrated = parse_md_persistent(&md_text);
            let wire: Vec<PersistentItemWire> = migrated.iter().map(Into::into).collect();
            write_json_atomic(&content_path, &wire)?;
            fs::remove_file(&md_path)?;
            info!("migrated persistent memory .md -> .json");
            migrated
        };

        let meta_path = self.persistent_meta_path();
        let meta = if meta_path.exists() {
            serde_json::from_str(&fs::read_to_string(&meta_path)?)?
        } else {
            Value::Object(Default::default())
        };

        Ok(Some((content, meta)))
    }

    pub fn save_persistent(&self, content: &[PersistentItem], meta: &Value) -> Result<()> {
        self.ensure_dirs()?;
        let _guard = LockGuard::acquire(&self.persistent_lock_path())?;
        let wire: Vec<PersistentItemWire> = content.iter().map(Into::into).collect();
        write_json_atomic(&self.persistent_content_path(), &wire)?;
        write_json_atomic(&self.persistent_meta_path(), meta)?;
        Ok(())
    }

    /// Snapshot the current persistent file to `archive/recent_<ts>.json`
    /// before any overwrite (§3.4 invariant). Returns `None` if there is
    /// no persistent file yet.
    pub fn archive_persistent(&self) -> Result<Option<PathBuf>> {
        let content_path = self.persistent_content_path();
        if !content_path.exists() {
            return Ok(None);
        }

        let archive_dir = self.persistent_archive_dir();
        fs::create_dir_all(&archive_dir)?;

        let _guard = LockGuard::acquire(&self.persistent_lock_path())?;
        let content = fs::read_to_string(&content_path)?;
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%f");
        let archive_path = archive_dir.join(format!("recent_{timestamp}.json"));
        fs::write(&archive_path, content)?;
        Ok(Some(archive_path))
    }
}

/// RAII advisory-lock guard over a neighboring `.lock` file.
struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive().map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to acquire advisory lock");
            MemoryError::LockTimeout(path.display().to_string())
        })?;
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let body = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&body)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| MemoryError::Io(e.error))?;
    Ok(())
}

fn append_jsonl(path: &Path, entries: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    for entry in entries {
        writeln!(f, "{}", serde_json::to_string(entry)?)?;
    }
    Ok(())
}

fn write_jsonl(path: &Path, entries: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(path)?;
    for entry in entries {
        writeln!(f, "{}", serde_json::to_string(entry)?)?;
    }
    Ok(())
}

fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    let f = File::open(path)?;
    let reader = BufReader::new(f);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(serde_json::from_str(trimmed)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObservationSource, Priority};

    fn sample_record(thread_ts: &str) -> MemoryRecord {
        MemoryRecord {
            thread_ts: thread_ts.to_string(),
            user_id: "U1".to_string(),
            username: "alice".to_string(),
            observations: vec![ObservationItem {
                id: "obs_20260727_000".to_string(),
                priority: Priority::High,
                content: "user is debugging a flaky test".to_string(),
                session_date: "2026-07-27".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                source: ObservationSource::Observer,
            }],
            observation_tokens: 42,
            last_observed_at: Some(chrono::Utc::now().to_rfc3339()),
            total_sessions_observed: 1,
            reflection_count: 0,
            anchor_ts: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn save_and_load_record_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path());
        let record = sample_record("100.1");
        store.save_record(&record).unwrap();

        let loaded = store.get_record("100.1").unwrap().unwrap();
        assert_eq!(loaded.observations.len(), 1);
        assert_eq!(loaded.observations[0].content, record.observations[0].content);
        assert_eq!(loaded.observation_tokens, 42);
    }

    #[test]
    fn pending_buffer_appends_and_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path());
        store
            .append_pending_messages("1.1", &[serde_json::json!({"text": "hi"})])
            .unwrap();
        store
            .append_pending_messages("1.1", &[serde_json::json!({"text": "there"})])
            .unwrap();
        assert_eq!(store.load_pending_messages("1.1").unwrap().len(), 2);
        store.clear_pending_messages("1.1").unwrap();
        assert!(store.load_pending_messages("1.1").unwrap().is_empty());
    }

    #[test]
    fn candidate_promotion_clears_all_sessions_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path());
        store
            .append_candidates("a", &[serde_json::json!({"content": "fact a"})])
            .unwrap();
        store
            .append_candidates("b", &[serde_json::json!({"content": "fact b"})])
            .unwrap();
        assert_eq!(store.load_all_candidates().unwrap().len(), 2);

        store.clear_all_candidates().unwrap();
        assert!(store.load_all_candidates().unwrap().is_empty());
    }

    #[test]
    fn archive_then_save_persistent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path());
        assert!(store.archive_persistent().unwrap().is_none());

        let item = PersistentItem {
            id: "ltm_20260727_000".to_string(),
            priority: Priority::Medium,
            content: "user prefers terse replies".to_string(),
            promoted_at: chrono::Utc::now().to_rfc3339(),
            source_obs_ids: vec!["obs_20260727_000".to_string()],
        };
        store
            .save_persistent(&[item.clone()], &serde_json::json!({}))
            .unwrap();

        let archived = store.archive_persistent().unwrap();
        assert!(archived.is_some());

        let (loaded, _) = store.get_persistent().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, item.content);
    }

    #[test]
    fn legacy_md_observations_migrate_on_read() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path());
        store.ensure_dirs().unwrap();
        fs::write(
            store.obs_md_path("legacy.1"),
            "## [2026-07-01]\n\u{1F534} server down\n",
        )
        .unwrap();
        fs::write(
            store.meta_path("legacy.1"),
            serde_json::to_string(&MemoryRecordMetaWire {
                thread_ts: "legacy.1".to_string(),
                user_id: String::new(),
                username: String::new(),
                observation_tokens: 0,
                last_observed_at: None,
                total_sessions_observed: 0,
                reflection_count: 0,
                anchor_ts: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .unwrap(),
        )
        .unwrap();

        let record = store.get_record("legacy.1").unwrap().unwrap();
        assert_eq!(record.observations.len(), 1);
        assert!(!store.obs_md_path("legacy.1").exists());
        assert!(store.obs_path("legacy.1").exists());
    }
}
