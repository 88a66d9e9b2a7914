use serde::{Deserialize, Serialize};

/// A single channel or thread message (§3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub ts: String,
    pub user: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestMeta {
    pub token_count: u64,
    pub last_digested_at: Option<String>,
    pub last_compressed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Digest {
    pub content: String,
    pub meta: DigestMeta,
}

/// What the judge wants done with a message, one item at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    None,
    React,
    Intervene,
}

/// Per-message judgment (§4.4.1(b)). Only the modern, per-message path is
/// implemented — the aggregated single-judgment shape the judge prompt can
/// still emit upstream has no representation here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeItem {
    pub ts: String,
    pub importance: u8,
    pub reaction_type: ReactionType,
    #[serde(default)]
    pub reaction_target: Option<String>,
    #[serde(default)]
    pub reaction_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub addressed_to_me: bool,
    #[serde(default)]
    pub related_to_me: bool,
    #[serde(default)]
    pub is_instruction: bool,
    #[serde(default)]
    pub context_meaning: Option<String>,
}

impl JudgeItem {
    /// Clamp importance into [0, 10] the way the judge parser does.
    pub fn clamp_importance(raw: i64) -> u8 {
        raw.clamp(0, 10) as u8
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeResult {
    pub items: Vec<JudgeItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    React,
    Message,
}

/// A concrete action to execute against the transport, derived from a
/// `JudgeItem` (§4.4.2).
#[derive(Debug, Clone)]
pub struct InterventionAction {
    pub kind: ActionKind,
    pub target: String,
    pub content: String,
}

impl InterventionAction {
    /// `None` if the item carries no actionable reaction, or is missing the
    /// target/content a `react`/`intervene` reaction requires.
    pub fn from_judge_item(item: &JudgeItem) -> Option<Self> {
        match item.reaction_type {
            ReactionType::None => None,
            ReactionType::React => {
                let target = item.reaction_target.clone()?;
                let content = item.reaction_content.clone()?;
                Some(Self {
                    kind: ActionKind::React,
                    target,
                    content,
                })
            }
            ReactionType::Intervene => {
                let target = item.reaction_target.clone()?;
                let content = item.reaction_content.clone()?;
                Some(Self {
                    kind: ActionKind::Message,
                    target,
                    content,
                })
            }
        }
    }
}

/// Per-channel digest/judge/intervene result bundle for debug logging.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub digest_refreshed: bool,
    pub react_actions: Vec<InterventionAction>,
    pub executed_intervention: Option<InterventionAction>,
    pub intervention_probability: Option<InterventionProbability>,
}

#[derive(Debug, Clone, Copy)]
pub struct InterventionProbability {
    pub importance: u8,
    pub time_factor: f64,
    pub freq_factor: f64,
    pub probability: f64,
    pub final_score: f64,
    pub threshold: f64,
    pub passed: bool,
}
