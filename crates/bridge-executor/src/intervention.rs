use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use bridge_engine::EngineAdapter;

use crate::presenter::PresentationContext;
use crate::types::RunRequest;

/// A prompt that arrived while the thread's engine call was already
/// running. `save_pending` always overwrites — only the most recent
/// intervention matters, per §4.3.
pub struct PendingPrompt {
    pub request: RunRequest,
    pub presentation: Arc<PresentationContext>,
}

/// Per-thread pending-prompt store plus best-effort interrupt firing
/// (§4.3). All operations are O(1) and non-blocking.
pub struct InterventionManager {
    pending: DashMap<String, PendingPrompt>,
    engine: Arc<dyn EngineAdapter>,
}

impl InterventionManager {
    pub fn new(engine: Arc<dyn EngineAdapter>) -> Self {
        Self {
            pending: DashMap::new(),
            engine,
        }
    }

    pub fn save_pending(&self, thread_ts: &str, pending: PendingPrompt) {
        self.pending.insert(thread_ts.to_string(), pending);
    }

    pub fn pop_pending(&self, thread_ts: &str) -> Option<PendingPrompt> {
        self.pending.remove(thread_ts).map(|(_, v)| v)
    }

    /// Fire-and-forget: an unsuccessful interrupt still leaves the pending
    /// entry, which runs naturally once the current call finishes.
    pub async fn fire_interrupt(&self, thread_ts: &str) {
        let interrupted = self.engine.interrupt(thread_ts).await;
        if interrupted {
            debug!(thread_ts, "interrupt delivered to running engine call");
        } else {
            warn!(thread_ts, "interrupt could not be delivered, pending will run after current call completes");
        }
    }
}
