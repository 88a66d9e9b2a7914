//! Engine `usage` accounting and the context-window gauge (§6).

use serde::{Deserialize, Serialize};

use crate::config::CONTEXT_WINDOW_TOKENS;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }
}

/// Render a `bar_len`-cell usage bar, e.g. `Context | ■■■■■■□□□□□□□□□□□□□□ | 30%`.
///
/// Returns `None` only when every field is zero — there is nothing
/// meaningful to render (a fresh session with no usage reported yet).
pub fn context_usage_bar(usage: &Usage, bar_len: usize) -> Option<String> {
    let total = usage.total_tokens();
    if total == 0 {
        return None;
    }
    let fraction = (total as f64 / CONTEXT_WINDOW_TOKENS as f64).min(1.0);
    let filled = ((fraction * bar_len as f64).round() as usize).min(bar_len);
    let empty = bar_len - filled;
    let pct = (fraction * 100.0).round() as u64;
    Some(format!(
        "Context | {}{} | {}%",
        "\u{25A0}".repeat(filled),
        "\u{25A1}".repeat(empty),
        pct
    ))
}
