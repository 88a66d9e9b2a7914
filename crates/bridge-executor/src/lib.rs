mod error;
mod executor;
mod intervention;
mod presenter;
mod restart;
mod result_processor;
mod types;

pub use error::{ExecutorError, Result};
pub use executor::{Executor, ResultSink};
pub use intervention::{InterventionManager, PendingPrompt};
pub use presenter::{PresentationContext, Presenter};
pub use restart::RestartManager;
pub use result_processor::{ResultProcessor, RunningSessionCounter};
pub use types::{EngineCallResult, RunRequest};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use bridge_core::types::{EngineSessionId, SourceType, ThreadTs, UserRole};
    use bridge_engine::{EngineAdapter, EngineEvent, EngineRequest};
    use bridge_sessions::SessionStore;

    use super::*;

    struct ScriptedEngine {
        events: Vec<EngineEvent>,
        interrupts: AtomicUsize,
        gate: tokio::sync::Notify,
        release_gate: AtomicBool,
    }

    impl ScriptedEngine {
        fn new(events: Vec<EngineEvent>) -> Self {
            Self {
                events,
                interrupts: AtomicUsize::new(0),
                gate: tokio::sync::Notify::new(),
                release_gate: AtomicBool::new(true),
            }
        }

        /// First `run` blocks until `interrupt` is called; every run after
        /// that (including a pending re-run triggered by that interrupt)
        /// proceeds immediately, mirroring a killed subprocess unblocking
        /// the read loop rather than hanging forever.
        fn blocking(events: Vec<EngineEvent>) -> Self {
            Self {
                events,
                interrupts: AtomicUsize::new(0),
                gate: tokio::sync::Notify::new(),
                release_gate: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EngineAdapter for ScriptedEngine {
        async fn run(
            &self,
            _req: EngineRequest,
            tx: mpsc::Sender<EngineEvent>,
            _cancel: CancellationToken,
        ) -> bridge_engine::Result<()> {
            if !self.release_gate.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            for event in &self.events {
                let _ = tx.send(event.clone()).await;
            }
            Ok(())
        }

        async fn interrupt(&self, _thread_ts: &str) -> bool {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            self.release_gate.store(true, Ordering::SeqCst);
            self.gate.notify_one();
            true
        }
    }

    struct RecordingPresenter {
        placeholders: Mutex<Vec<String>>,
        thread_replies: Mutex<Vec<String>>,
    }

    impl RecordingPresenter {
        fn new() -> Self {
            Self {
                placeholders: Mutex::new(Vec::new()),
                thread_replies: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Presenter for RecordingPresenter {
        async fn update_placeholder(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
            self.placeholders.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn post_placeholder(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<String> {
            self.placeholders.lock().unwrap().push(text.to_string());
            Ok("new-ts".to_string())
        }

        async fn post_thread_reply(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
            self.thread_replies.lock().unwrap().push(text.to_string());
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

    struct NoopRestartManager;

    #[async_trait]
    impl RestartManager for NoopRestartManager {
        fn is_pending(&self) -> bool {
            false
        }
        async fn request_update(&self) {}
        async fn request_restart(&self) {}
        async fn send_confirmation_prompt(&self, _pctx: &PresentationContext) {}
    }

    struct FixedRunningCount(usize);

    impl RunningSessionCounter for FixedRunningCount {
        fn count(&self) -> usize {
            self.0
        }
    }

    fn make_request(thread_ts: &str) -> RunRequest {
        RunRequest {
            thread_ts: thread_ts.to_string(),
            msg_ts: thread_ts.to_string(),
            prompt: "hello".to_string(),
            session_id: EngineSessionId::empty(),
            role: UserRole::Viewer,
            user_message: Some("hello".to_string()),
            channel_id: "C1".to_string(),
            placeholder_ts: "placeholder-1".to_string(),
        }
    }

    fn make_presentation(thread_ts: &str) -> Arc<PresentationContext> {
        Arc::new(PresentationContext::new(
            "C1",
            thread_ts,
            thread_ts,
            UserRole::Viewer,
            "placeholder-1",
            EngineSessionId::empty(),
        ))
    }

    fn make_executor(
        engine: Arc<dyn EngineAdapter>,
        presenter: Arc<RecordingPresenter>,
    ) -> (Executor, Arc<SessionStore>) {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(tmp.path()).unwrap());
        let result_processor = Arc::new(ResultProcessor::new(
            presenter,
            Arc::new(NoopRestartManager),
            Arc::new(FixedRunningCount(0)),
        ));
        (
            Executor::new(engine, sessions.clone(), result_processor, None, "claude-test"),
            sessions,
        )
    }

    #[tokio::test]
    async fn successful_run_renders_output_and_persists_session() {
        let thread_ts = ThreadTs::from("100.1");
        let engine = Arc::new(ScriptedEngine::new(vec![EngineEvent::Result {
            output: "done".to_string(),
            session_id: Some("sess-1".to_string()),
            usage: None,
            interrupted: false,
        }]));
        let presenter = Arc::new(RecordingPresenter::new());
        let (executor, sessions) = make_executor(engine, presenter.clone());

        sessions
            .get_or_create(
                &thread_ts,
                &"C1".into(),
                &"U1".into(),
                "alice",
                UserRole::Viewer,
                SourceType::Thread,
            )
            .unwrap();

        executor
            .run(make_request("100.1"), make_presentation("100.1"))
            .await;

        assert_eq!(presenter.placeholders.lock().unwrap().as_slice(), ["done"]);
        let session = sessions.get(&thread_ts).unwrap().unwrap();
        assert_eq!(session.session_id.as_deref(), Some("sess-1"));
        assert_eq!(session.message_count, 1);
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_prompt_becomes_pending_and_fires_interrupt() {
        let engine = Arc::new(ScriptedEngine::blocking(vec![EngineEvent::Result {
            output: "first".to_string(),
            session_id: None,
            usage: None,
            interrupted: false,
        }]));
        let presenter = Arc::new(RecordingPresenter::new());
        let (executor, _sessions) = make_executor(engine.clone(), presenter.clone());
        let executor = Arc::new(executor);

        let first = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .run(make_request("200.1"), make_presentation("200.1"))
                    .await;
            })
        };

        // give the first run a chance to take the lock before the second arrives
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        executor
            .run(make_request("200.1"), make_presentation("200.1"))
            .await;

        first.await.unwrap();

        assert_eq!(engine.interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(presenter.placeholders.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn interrupted_result_renders_interrupted_placeholder() {
        let engine = Arc::new(ScriptedEngine::new(vec![EngineEvent::Result {
            output: String::new(),
            session_id: None,
            usage: None,
            interrupted: true,
        }]));
        let presenter = Arc::new(RecordingPresenter::new());
        let (executor, _sessions) = make_executor(engine, presenter.clone());

        executor
            .run(make_request("300.1"), make_presentation("300.1"))
            .await;

        assert_eq!(presenter.placeholders.lock().unwrap().as_slice(), ["(중단됨)"]);
    }
}
