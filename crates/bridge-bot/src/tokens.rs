//! Approximate token counter shared by the memory and channel-observer
//! pipelines. Neither pipeline needs an exact count, only a stable
//! proxy for the thresholds in `bridge_core::config`; the real tokenizer
//! belongs to whichever engine is actually generating, which is outside
//! this workspace's scope.

/// Roughly 4 characters per token, the same ballpark every teacher example
/// that counts tokens without a real tokenizer uses.
pub fn approx_token_count(text: &str) -> u64 {
    ((text.chars().count() as u64) / 4).max(if text.is_empty() { 0 } else { 1 })
}
