use std::sync::Mutex;

use async_trait::async_trait;
use bridge_core::types::{EngineSessionId, UserRole};

/// Mutable presentation state shared across a run and its pending
/// continuations. Generalizes the teacher's `MessageContext` decoupling
/// pattern: the executor and result processor only ever see this trait
/// boundary, never a concrete Slack client.
pub struct PresentationContext {
    pub channel_id: String,
    pub thread_ts: String,
    pub msg_ts: String,
    pub role: UserRole,
    /// The "thinking" placeholder message this run is bound to; rebound on
    /// stale-placeholder detection (§4.6).
    last_msg_ts: Mutex<String>,
    session_id: Mutex<EngineSessionId>,
}

impl PresentationContext {
    pub fn new(
        channel_id: impl Into<String>,
        thread_ts: impl Into<String>,
        msg_ts: impl Into<String>,
        role: UserRole,
        placeholder_ts: impl Into<String>,
        session_id: EngineSessionId,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
            msg_ts: msg_ts.into(),
            role,
            last_msg_ts: Mutex::new(placeholder_ts.into()),
            session_id: Mutex::new(session_id),
        }
    }

    pub fn last_msg_ts(&self) -> String {
        self.last_msg_ts.lock().unwrap().clone()
    }

    pub fn rebind_placeholder(&self, new_ts: impl Into<String>) {
        *self.last_msg_ts.lock().unwrap() = new_ts.into();
    }

    pub fn session_id(&self) -> EngineSessionId {
        self.session_id.lock().unwrap().clone()
    }

    pub fn set_session_id(&self, session_id: EngineSessionId) {
        *self.session_id.lock().unwrap() = session_id;
    }
}

/// Transport-agnostic presentation boundary (§4.6.A), implemented by the
/// concrete Slack transport crate.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Replaces the current placeholder's text.
    async fn update_placeholder(&self, pctx: &PresentationContext, text: &str) -> anyhow::Result<()>;

    /// Posts a fresh placeholder (stale-placeholder rebind) and returns its ts.
    async fn post_placeholder(&self, pctx: &PresentationContext, text: &str) -> anyhow::Result<String>;

    /// Posts a thread reply, used for pagination overflow.
    async fn post_thread_reply(&self, pctx: &PresentationContext, text: &str) -> anyhow::Result<()>;

    /// Whether a message from someone other than the bot has appeared in
    /// the thread after `since_ts` — used for stale-placeholder detection.
    async fn has_newer_messages(&self, pctx: &PresentationContext, since_ts: &str) -> anyhow::Result<bool>;

    async fn upload_file(&self, pctx: &PresentationContext, path: &str, as_attachment: bool) -> anyhow::Result<()>;

    async fn request_image(&self, pctx: &PresentationContext, prompt: &str) -> anyhow::Result<()>;

    async fn forward_list_run(&self, name: &str) -> anyhow::Result<()>;
}
