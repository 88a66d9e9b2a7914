use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const CONTEXT_WINDOW_TOKENS: u64 = 200_000;
pub const DEFAULT_THRESHOLD_A: usize = 5;
pub const DEFAULT_THRESHOLD_B: usize = 12;
pub const DEFAULT_INTERVENTION_THRESHOLD: f64 = 0.3;
pub const DEFAULT_COOLDOWN_SECS: u64 = 600;

/// Top-level config (bridge.toml + BRIDGE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub slack: SlackConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub channel_observer: ChannelObserverConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub app_token: String,
    pub bot_token: String,
    /// The literal mention string, e.g. `<@U0123>`, used to detect direct address.
    pub bot_user_id: String,
    /// Optional channel that receives structured debug event traces.
    pub debug_channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine binary (local subprocess mode).
    #[serde(default = "default_engine_binary")]
    pub binary_path: String,
    /// Remote HTTP/SSE engine endpoint; when set, the remote adapter is used
    /// instead of spawning a subprocess.
    pub remote_url: Option<String>,
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_sessions_dir")]
    pub dir: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: default_sessions_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_dir")]
    pub dir: String,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: default_memory_dir(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

/// Channel-observer pipeline configuration. `judge_model` and
/// `compress_model` are kept distinct even though they may resolve to the
/// same engine endpoint by default — the digest compressor is logically a
/// separate consumer from the per-message judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelObserverConfig {
    #[serde(default = "default_threshold_a")]
    pub threshold_a: usize,
    #[serde(default = "default_threshold_b")]
    pub threshold_b: usize,
    #[serde(default = "default_intervention_threshold")]
    pub intervention_threshold: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_model")]
    pub judge_model: String,
    #[serde(default = "default_model")]
    pub compress_model: String,
    /// Word that forces a judge pass even with an empty pending buffer.
    #[serde(default = "default_trigger_word")]
    pub trigger_word: String,
    /// Digest size past which a compression round is triggered.
    #[serde(default = "default_digest_max_tokens")]
    pub digest_max_tokens: u64,
    /// Target digest size after compression.
    #[serde(default = "default_digest_target_tokens")]
    pub digest_target_tokens: u64,
    /// Sliding window, in seconds, over which `recent` interventions are counted.
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,
    /// TTL, in seconds, for a mention-tracker entry.
    #[serde(default = "default_mention_ttl_secs")]
    pub mention_ttl_secs: u64,
    #[serde(default = "default_channel_observer_dir")]
    pub dir: String,
}

impl Default for ChannelObserverConfig {
    fn default() -> Self {
        Self {
            threshold_a: default_threshold_a(),
            threshold_b: default_threshold_b(),
            intervention_threshold: default_intervention_threshold(),
            cooldown_secs: default_cooldown_secs(),
            judge_model: default_model(),
            compress_model: default_model(),
            trigger_word: default_trigger_word(),
            digest_max_tokens: default_digest_max_tokens(),
            digest_target_tokens: default_digest_target_tokens(),
            recent_window_secs: default_recent_window_secs(),
            mention_ttl_secs: default_mention_ttl_secs(),
            dir: default_channel_observer_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    /// Plugin module paths/names to load at startup, in priority order.
    #[serde(default)]
    pub enabled_plugins: Vec<String>,
}

/// Static role assignment. A user not in `admin_users` is a viewer; there
/// is no third tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub admin_users: Vec<String>,
}

fn default_engine_binary() -> String {
    "engine".to_string()
}
fn default_engine_timeout_secs() -> u64 {
    120
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_sessions_dir() -> String {
    home_subdir("sessions")
}
fn default_memory_dir() -> String {
    home_subdir("memory")
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_threshold_a() -> usize {
    DEFAULT_THRESHOLD_A
}
fn default_threshold_b() -> usize {
    DEFAULT_THRESHOLD_B
}
fn default_intervention_threshold() -> f64 {
    DEFAULT_INTERVENTION_THRESHOLD
}
fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}
fn default_trigger_word() -> String {
    "!notify".to_string()
}
fn default_digest_max_tokens() -> u64 {
    10_000
}
fn default_digest_target_tokens() -> u64 {
    5_000
}
fn default_recent_window_secs() -> u64 {
    3_600
}
fn default_mention_ttl_secs() -> u64 {
    1_800
}
fn default_channel_observer_dir() -> String {
    home_subdir("channels")
}

fn home_subdir(leaf: &str) -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.bridge/{leaf}")
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.bridge/bridge.toml")
}

impl BridgeConfig {
    /// Load config from a TOML file with BRIDGE_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.bridge/bridge.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BridgeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BRIDGE_").split("_"))
            .extract()
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;

        Ok(config)
    }
}
