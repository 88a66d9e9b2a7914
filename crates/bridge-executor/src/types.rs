use bridge_core::marker::Marker;
use bridge_core::types::{EngineSessionId, UserRole};
use bridge_core::usage::Usage;

/// Application-level result of one engine call (§4.2.1), built from the
/// terminal `Result` event plus parsed in-band markers.
#[derive(Debug, Clone, Default)]
pub struct EngineCallResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub session_id: Option<String>,
    pub usage: Option<Usage>,
    pub interrupted: bool,
    pub files: Vec<String>,
    pub attachments: Vec<String>,
    pub image_gen_prompts: Vec<String>,
    pub update_requested: bool,
    pub restart_requested: bool,
    pub list_run: Option<String>,
    /// `<!-- SUMMARY -->` content (§6): shown inline in place of the full
    /// body.
    pub summary: Option<String>,
    /// `<!-- DETAILS -->` content (§6): posted as a follow-up thread reply.
    pub details: Option<String>,
}

impl EngineCallResult {
    pub fn from_output(
        output: String,
        session_id: Option<String>,
        usage: Option<Usage>,
        interrupted: bool,
    ) -> Self {
        let markers = bridge_core::marker::extract_markers(&output);
        let mut result = Self {
            success: true,
            output,
            error: None,
            session_id,
            usage,
            interrupted,
            files: Vec::new(),
            attachments: Vec::new(),
            image_gen_prompts: Vec::new(),
            update_requested: false,
            restart_requested: false,
            list_run: None,
            summary: None,
            details: None,
        };
        for marker in markers {
            match marker {
                Marker::File(path) => result.files.push(path),
                Marker::Attach(path) => result.attachments.push(path),
                Marker::ImageGen(prompt) => result.image_gen_prompts.push(prompt),
                Marker::ListRun(name) => result.list_run = Some(name),
                Marker::Update => result.update_requested = true,
                Marker::Restart => result.restart_requested = true,
                Marker::Summary(text) => result.summary = Some(text),
                Marker::Details(text) => result.details = Some(text),
            }
        }
        result
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            success: false,
            interrupted: true,
            ..Default::default()
        }
    }
}

/// One request into the executor. Mirrors `PresentationContext` plus the
/// prompt fields the original `ClaudeExecutor.run` takes as arguments.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub thread_ts: String,
    pub msg_ts: String,
    pub prompt: String,
    pub session_id: EngineSessionId,
    pub role: UserRole,
    pub user_message: Option<String>,
    pub channel_id: String,
    pub placeholder_ts: String,
}
