use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use bridge_core::types::{EngineSessionId, ThreadTs};
use bridge_engine::{EngineAdapter, EngineEvent, EngineRequest};
use bridge_sessions::SessionStore;

use crate::intervention::{InterventionManager, PendingPrompt};
use crate::presenter::PresentationContext;
use crate::result_processor::ResultProcessor;
use crate::types::{EngineCallResult, RunRequest};

/// Invoked once a run produces a result (success, error, or interrupted),
/// before presentation — the executor's hook into observational memory
/// and any other post-turn side effect (§4.5 feeds off this).
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn on_result(&self, result: &EngineCallResult, thread_ts: &str, user_message: Option<&str>);
}

/// Per-thread serialization + intervention core (§4.2). Never panics or
/// propagates engine/transport errors — everything flows through
/// `ResultProcessor`.
pub struct Executor {
    engine: Arc<dyn EngineAdapter>,
    sessions: Arc<SessionStore>,
    intervention: Arc<InterventionManager>,
    result_processor: Arc<ResultProcessor>,
    result_sink: Option<Arc<dyn ResultSink>>,
    model: String,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    running: DashMap<String, ()>,
}

impl Executor {
    pub fn new(
        engine: Arc<dyn EngineAdapter>,
        sessions: Arc<SessionStore>,
        result_processor: Arc<ResultProcessor>,
        result_sink: Option<Arc<dyn ResultSink>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            intervention: Arc::new(InterventionManager::new(engine.clone())),
            engine,
            sessions,
            result_processor,
            result_sink,
            model: model.into(),
            locks: DashMap::new(),
            running: DashMap::new(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    fn lock_for(&self, thread_ts: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(thread_ts.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Entry point (§4.2 step 1): acquire the per-thread lock
    /// non-blockingly. On failure, save a `PendingPrompt` (overwriting any
    /// prior one) and fire a best-effort interrupt.
    #[instrument(skip(self, presentation), fields(thread_ts = %req.thread_ts))]
    pub async fn run(&self, req: RunRequest, presentation: Arc<PresentationContext>) {
        let lock = self.lock_for(&req.thread_ts);
        match lock.try_lock_owned() {
            Ok(guard) => {
                self.running.insert(req.thread_ts.clone(), ());
                self.run_with_lock(req, presentation).await;
                self.running.remove(&req.thread_ts);
                drop(guard);
            }
            Err(_) => {
                info!(thread_ts = %req.thread_ts, "intervention: run already in progress");
                let thread_ts = req.thread_ts.clone();
                self.intervention.save_pending(
                    &thread_ts,
                    PendingPrompt {
                        request: req,
                        presentation,
                    },
                );
                self.intervention.fire_interrupt(&thread_ts).await;
            }
        }
    }

    async fn run_with_lock(&self, mut req: RunRequest, mut presentation: Arc<PresentationContext>) {
        loop {
            self.execute_once(&req, &presentation).await;

            match self.intervention.pop_pending(&req.thread_ts) {
                Some(pending) => {
                    info!(thread_ts = %req.thread_ts, "continuing with pending intervention prompt");
                    req = pending.request;
                    presentation = pending.presentation;
                }
                None => break,
            }
        }
    }

    async fn execute_once(&self, req: &RunRequest, presentation: &PresentationContext) {
        let engine_req = EngineRequest {
            thread_ts: req.thread_ts.clone(),
            prompt: req.prompt.clone(),
            session_id: req.session_id.clone(),
            model: self.model.clone(),
            system_prompt: None,
        };

        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let cancel_for_run = cancel.clone();
        let run_handle = tokio::spawn(async move { engine.run(engine_req, tx, cancel_for_run).await });

        let mut last_update = Instant::now();
        let mut terminal: Option<EngineCallResult> = None;
        let mut assigned_session_id: Option<String> = None;

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Init { session_id } => {
                    assigned_session_id = Some(session_id.clone());
                    presentation.set_session_id(EngineSessionId(Some(session_id)));
                }
                EngineEvent::AssistantDelta { text } => {
                    self.result_processor
                        .handle_progress(presentation, &text, &mut last_update)
                        .await;
                }
                EngineEvent::Compact { trigger, message } => {
                    self.result_processor.handle_compact(presentation, trigger, &message).await;
                }
                EngineEvent::Result {
                    output,
                    session_id,
                    usage,
                    interrupted,
                } => {
                    let resolved_session = session_id.or(assigned_session_id.clone());
                    terminal = Some(if interrupted {
                        EngineCallResult::interrupted()
                    } else {
                        EngineCallResult::from_output(output, resolved_session, usage, interrupted)
                    });
                }
            }
        }

        let run_outcome = run_handle.await;

        let result = match (terminal, run_outcome) {
            (Some(result), Ok(Ok(()))) => result,
            (Some(result), _) => result,
            (None, Ok(Ok(()))) => EngineCallResult::error("engine produced no result"),
            (None, Ok(Err(err))) => {
                warn!(thread_ts = %req.thread_ts, error = %err, "engine call failed");
                EngineCallResult::error(err.to_string())
            }
            (None, Err(join_err)) => {
                warn!(thread_ts = %req.thread_ts, error = %join_err, "engine task panicked");
                EngineCallResult::error("internal error".to_string())
            }
        };

        if let Some(session_id) = &result.session_id {
            if let Ok(Some(mut session)) = self.sessions.get(&ThreadTs::from(req.thread_ts.as_str())) {
                session.rotate_session_id(session_id.clone());
                session.record_turn();
                let _ = self.sessions.save(&session);
            }
        }

        if let Some(sink) = &self.result_sink {
            sink.on_result(&result, &req.thread_ts, req.user_message.as_deref()).await;
        }

        if result.interrupted {
            self.result_processor.handle_interrupted(presentation).await;
        } else if !result.success {
            self.result_processor
                .handle_error(presentation, result.error.as_deref().unwrap_or("unknown error"))
                .await;
        } else {
            self.result_processor.handle_success(presentation, &result).await;
        }
    }
}
