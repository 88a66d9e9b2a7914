//! Bounded `thread_ts -> expires_at` map (§3.6). While a thread is tracked
//! the observer may still collect its messages through the normal buffer
//! progression, but must not judge or react to them — the direct-mention
//! path is already handling that conversation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct MentionTracker {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl MentionTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mark `thread_ts` as mention-handled for the next `ttl`.
    pub fn mark(&self, thread_ts: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(thread_ts.to_string(), Instant::now() + self.ttl);
    }

    /// Whether `thread_ts` is currently tracked. Lazily reaps the entry if
    /// it has expired.
    pub fn is_tracked(&self, thread_ts: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(thread_ts) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                entries.remove(thread_ts);
                false
            }
            None => false,
        }
    }

    /// Drop every expired entry. Call periodically to bound memory; never
    /// required for correctness since `is_tracked` reaps lazily too.
    pub fn gc(&self) {
        let now = Instant::now();
        self.entries.lock().unwrap().retain(|_, expires_at| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
