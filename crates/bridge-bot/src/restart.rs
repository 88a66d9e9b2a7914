//! `RestartManager`/`RunningSessionCounter` implementations (§4.6). No
//! self-update mechanism is implemented here — the original only ever
//! mocks `restart_manager` in its tests, and actually replacing the
//! running binary is process/host administration left to whatever
//! supervises this process (systemd, a container orchestrator). Setting
//! the pending flag and exiting is the whole contract; relaunch is the
//! supervisor's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{info, warn};

use bridge_executor::{Executor, Presenter, PresentationContext, RestartManager, RunningSessionCounter};

pub struct ProcessRestartManager {
    presenter: Arc<dyn Presenter>,
    pending: AtomicBool,
}

impl ProcessRestartManager {
    pub fn new(presenter: Arc<dyn Presenter>) -> Self {
        Self {
            presenter,
            pending: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RestartManager for ProcessRestartManager {
    fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    async fn request_update(&self) {
        self.pending.store(true, Ordering::SeqCst);
        info!("update requested, exiting for supervisor relaunch");
        std::process::exit(0);
    }

    async fn request_restart(&self) {
        self.pending.store(true, Ordering::SeqCst);
        info!("restart requested, exiting for supervisor relaunch");
        std::process::exit(0);
    }

    async fn send_confirmation_prompt(&self, pctx: &PresentationContext) {
        let text = "Sessions are still running. Send the marker again once they finish to confirm.";
        if let Err(err) = self.presenter.post_thread_reply(pctx, text).await {
            warn!(%err, "failed to post restart confirmation prompt");
        }
    }
}

/// Wraps `Executor::running_count` for `ResultProcessor`'s and
/// `CommandRouter`'s stale-running checks. `Executor` itself depends on a
/// `ResultProcessor` that needs a running-count handle, so this cell is
/// constructed empty and filled in once the executor exists; reads before
/// that point (there are none on the real startup path) see zero.
pub struct DeferredRunningCount {
    executor: OnceLock<Arc<Executor>>,
}

impl DeferredRunningCount {
    pub fn new() -> Self {
        Self { executor: OnceLock::new() }
    }

    pub fn bind(&self, executor: Arc<Executor>) {
        let _ = self.executor.set(executor);
    }
}

impl Default for DeferredRunningCount {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningSessionCounter for DeferredRunningCount {
    fn count(&self) -> usize {
        self.executor.get().map(|e| e.running_count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bridge_core::types::UserRole;

    use super::*;

    struct RecordingPresenter {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Presenter for RecordingPresenter {
        async fn update_placeholder(&self, _pctx: &PresentationContext, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn post_placeholder(&self, _pctx: &PresentationContext, _text: &str) -> anyhow::Result<String> {
            Ok("ts".to_string())
        }
        async fn post_thread_reply(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
            self.replies.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn has_newer_messages(&self, _pctx: &PresentationContext, _since_ts: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn upload_file(&self, _pctx: &PresentationContext, _path: &str, _as_attachment: bool) -> anyhow::Result<()> {
            Ok(())
        }
        async fn request_image(&self, _pctx: &PresentationContext, _prompt: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn forward_list_run(&self, _name: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn pctx() -> PresentationContext {
        PresentationContext::new("C1", "100.1", "100.1", UserRole::Viewer, "placeholder-1", Default::default())
    }

    #[tokio::test]
    async fn send_confirmation_prompt_posts_a_thread_reply() {
        let presenter = Arc::new(RecordingPresenter { replies: Mutex::new(Vec::new()) });
        let manager = ProcessRestartManager::new(presenter.clone());

        manager.send_confirmation_prompt(&pctx()).await;

        assert_eq!(presenter.replies.lock().unwrap().len(), 1);
        assert!(!manager.is_pending());
    }

    #[test]
    fn deferred_running_count_is_zero_before_bind() {
        let counter = DeferredRunningCount::new();
        assert_eq!(counter.count(), 0);
    }
}
