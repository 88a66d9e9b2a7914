use serde::{Deserialize, Serialize};

/// Priority order for prompt injection and rendering: 🔴 (high) > 🟡 (medium) > 🟢 (low).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn emoji(&self) -> &'static str {
        match self {
            Priority::High => "\u{1F534}",
            Priority::Medium => "\u{1F7E1}",
            Priority::Low => "\u{1F7E2}",
        }
    }

    pub fn from_emoji(s: &str) -> Option<Self> {
        match s {
            "\u{1F534}" => Some(Priority::High),
            "\u{1F7E1}" => Some(Priority::Medium),
            "\u{1F7E2}" => Some(Priority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    Observer,
    Reflector,
    Migrated,
}

impl ObservationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationSource::Observer => "observer",
            ObservationSource::Reflector => "reflector",
            ObservationSource::Migrated => "migrated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "reflector" => ObservationSource::Reflector,
            "migrated" => ObservationSource::Migrated,
            _ => ObservationSource::Observer,
        }
    }
}

/// §3.4 observation item, one per session-scoped observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationItem {
    pub id: String,
    pub priority: Priority,
    pub content: String,
    pub session_date: String,
    pub created_at: String,
    pub source: ObservationSource,
}

/// §3.4 long-term memory item, shared across sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentItem {
    pub id: String,
    pub priority: Priority,
    pub content: String,
    pub promoted_at: String,
    pub source_obs_ids: Vec<String>,
}

/// Free-form proposed long-term fact, not yet structured or promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub ts: String,
    pub priority_emoji: String,
    pub content: String,
}

/// Per-session observation record (meta + observations).
#[derive(Debug, Clone, Default)]
pub struct MemoryRecord {
    pub thread_ts: String,
    pub user_id: String,
    pub username: String,
    pub observations: Vec<ObservationItem>,
    pub observation_tokens: u64,
    pub last_observed_at: Option<String>,
    pub total_sessions_observed: u32,
    pub reflection_count: u32,
    pub anchor_ts: Option<String>,
    pub created_at: String,
}

// -- serde wire shapes, kept distinct from the domain types above so
// Priority/ObservationSource can stay ergonomic enums instead of stringly
// typed fields everywhere else in this crate.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ObservationItemWire {
    pub id: String,
    pub priority: String,
    pub content: String,
    pub session_date: String,
    pub created_at: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "observer".to_string()
}

impl From<&ObservationItem> for ObservationItemWire {
    fn from(v: &ObservationItem) -> Self {
        Self {
            id: v.id.clone(),
            priority: v.priority.emoji().to_string(),
            content: v.content.clone(),
            session_date: v.session_date.clone(),
            created_at: v.created_at.clone(),
            source: v.source.as_str().to_string(),
        }
    }
}

impl From<ObservationItemWire> for ObservationItem {
    fn from(w: ObservationItemWire) -> Self {
        Self {
            id: w.id,
            priority: Priority::from_emoji(&w.priority).unwrap_or(Priority::Low),
            content: w.content,
            session_date: w.session_date,
            created_at: w.created_at,
            source: ObservationSource::from_str(&w.source),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistentItemWire {
    pub id: String,
    pub priority: String,
    pub content: String,
    pub promoted_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_obs_ids: Vec<String>,
}

impl From<&PersistentItem> for PersistentItemWire {
    fn from(v: &PersistentItem) -> Self {
        Self {
            id: v.id.clone(),
            priority: v.priority.emoji().to_string(),
            content: v.content.clone(),
            promoted_at: v.promoted_at.clone(),
            source_obs_ids: v.source_obs_ids.clone(),
        }
    }
}

impl From<PersistentItemWire> for PersistentItem {
    fn from(w: PersistentItemWire) -> Self {
        Self {
            id: w.id,
            priority: Priority::from_emoji(&w.priority).unwrap_or(Priority::Low),
            content: w.content,
            promoted_at: w.promoted_at,
            source_obs_ids: w.source_obs_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MemoryRecordMetaWire {
    pub thread_ts: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub observation_tokens: u64,
    #[serde(default)]
    pub last_observed_at: Option<String>,
    #[serde(default)]
    pub total_sessions_observed: u32,
    #[serde(default)]
    pub reflection_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_ts: Option<String>,
    pub created_at: String,
}
