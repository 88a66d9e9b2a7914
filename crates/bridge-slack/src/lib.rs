mod client;
mod error;
mod ingress;
mod router;
mod types;

pub use client::{SlackHyperClient, SlackTransport};
pub use error::{Result, SlackError};
pub use ingress::{ChannelObserverRunner, ContextInjector, SlackIngress};
pub use router::CommandRouter;
pub use types::{resolve_role, IngestedMessage};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use bridge_core::types::UserRole;
    use bridge_executor::{PresentationContext, Presenter, RestartManager, RunningSessionCounter};
    use bridge_sessions::SessionStore;

    use super::*;

    struct RecordingPresenter {
        replies: Mutex<Vec<String>>,
    }

    impl RecordingPresenter {
        fn new() -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Presenter for RecordingPresenter {
        async fn update_placeholder(&self, _pctx: &PresentationContext, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn post_placeholder(&self, _pctx: &PresentationContext, _text: &str) -> anyhow::Result<String> {
            Ok("new-ts".to_string())
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

    struct NoopRestartManager {
        pending: bool,
        updates: Mutex<usize>,
        restarts: Mutex<usize>,
    }

    impl NoopRestartManager {
        fn new(pending: bool) -> Self {
            Self {
                pending,
                updates: Mutex::new(0),
                restarts: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RestartManager for NoopRestartManager {
        fn is_pending(&self) -> bool {
            self.pending
        }
        async fn request_update(&self) {
            *self.updates.lock().unwrap() += 1;
        }
        async fn request_restart(&self) {
            *self.restarts.lock().unwrap() += 1;
        }
        async fn send_confirmation_prompt(&self, _pctx: &PresentationContext) {}
    }

    struct FixedRunningCount(usize);

    impl RunningSessionCounter for FixedRunningCount {
        fn count(&self) -> usize {
            self.0
        }
    }

    fn pctx(role: UserRole) -> PresentationContext {
        PresentationContext::new("C1", "100.1", "100.1", role, "placeholder-1", Default::default())
    }

    fn make_router(
        restart_manager: Arc<NoopRestartManager>,
        running: usize,
        presenter: Arc<RecordingPresenter>,
    ) -> CommandRouter {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(tmp.path()).unwrap());
        CommandRouter::new(sessions, restart_manager, Arc::new(FixedRunningCount(running)), None, presenter)
    }

    #[tokio::test]
    async fn help_command_replies_and_is_handled() {
        let presenter = Arc::new(RecordingPresenter::new());
        let router = make_router(Arc::new(NoopRestartManager::new(false)), 0, presenter.clone());
        let handled = router.try_handle("help", &pctx(UserRole::Viewer)).await;
        assert!(handled);
        assert_eq!(presenter.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_denied_for_non_admin() {
        let presenter = Arc::new(RecordingPresenter::new());
        let restart_manager = Arc::new(NoopRestartManager::new(false));
        let router = make_router(restart_manager.clone(), 0, presenter.clone());
        let handled = router.try_handle("update", &pctx(UserRole::Viewer)).await;
        assert!(handled);
        assert_eq!(*restart_manager.updates.lock().unwrap(), 0);
        assert!(presenter.replies.lock().unwrap()[0].contains("관리자"));
    }

    #[tokio::test]
    async fn update_runs_directly_for_admin_with_no_running_sessions() {
        let presenter = Arc::new(RecordingPresenter::new());
        let restart_manager = Arc::new(NoopRestartManager::new(false));
        let router = make_router(restart_manager.clone(), 0, presenter.clone());
        let handled = router.try_handle("update", &pctx(UserRole::Admin)).await;
        assert!(handled);
        assert_eq!(*restart_manager.updates.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn plugins_command_replies_when_none_loaded() {
        use bridge_hooks::PluginManager;

        let presenter = Arc::new(RecordingPresenter::new());
        let tmp = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(tmp.path()).unwrap());
        let plugins = Arc::new(PluginManager::new(None));
        let router = CommandRouter::new(
            sessions,
            Arc::new(NoopRestartManager::new(false)),
            Arc::new(FixedRunningCount(0)),
            Some(plugins),
            presenter.clone(),
        );

        let handled = router.try_handle("plugins", &pctx(UserRole::Admin)).await;
        assert!(handled);
        assert_eq!(presenter.replies.lock().unwrap().len(), 1);
        assert!(presenter.replies.lock().unwrap()[0].contains("플러그인"));
    }

    #[tokio::test]
    async fn unrecognized_text_is_not_handled() {
        let presenter = Arc::new(RecordingPresenter::new());
        let router = make_router(Arc::new(NoopRestartManager::new(false)), 0, presenter.clone());
        let handled = router.try_handle("what is the weather", &pctx(UserRole::Admin)).await;
        assert!(!handled);
    }
}
