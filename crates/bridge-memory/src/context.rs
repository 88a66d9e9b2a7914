//! Injection (read path) — §4.5.5. Assembles the prompt-prefix block a
//! turn is run with: long-term memory, session observations (with
//! relative-day annotations), new-since-last-turn observations, and a
//! channel-observation summary scoped by `thread_ts`.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};

use crate::store::MemoryStore;
use crate::types::{ObservationItem, PersistentItem};

/// One calendar day's worth of rendered session observations. Blocks are
/// produced oldest-first so the budget pass can drop from the front.
struct SessionBlock {
    text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelObservationBlock {
    pub digest: Option<String>,
    pub recent_channel: Vec<String>,
    pub recent_thread: Vec<String>,
}

pub struct ContextBuilder<'a> {
    store: &'a MemoryStore,
    token_budget: u64,
    count_tokens: &'a dyn Fn(&str) -> u64,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(store: &'a MemoryStore, token_budget: u64, count_tokens: &'a dyn Fn(&str) -> u64) -> Self {
        Self {
            store,
            token_budget,
            count_tokens,
        }
    }

    /// Build the full injection block for `thread_ts`. Returns `None` if
    /// every section is empty.
    pub fn build(
        &self,
        thread_ts: &str,
        channel: Option<&ChannelObservationBlock>,
    ) -> crate::error::Result<Option<String>> {
        let long_term = match self.store.get_persistent()? {
            Some((persistent, _meta)) if !persistent.is_empty() => Some(render_long_term(&persistent)),
            _ => None,
        };

        let session_blocks = match self.store.get_record(thread_ts)? {
            Some(record) if !record.observations.is_empty() => session_blocks(&record.observations),
            _ => Vec::new(),
        };

        let new_obs = self.store.get_new_observations(thread_ts)?;
        let new_obs = if new_obs.is_empty() { None } else { Some(render_new_observations(&new_obs)) };

        let channel = channel.and_then(render_channel);

        if long_term.is_none() && session_blocks.is_empty() && new_obs.is_none() && channel.is_none() {
            return Ok(None);
        }

        Ok(Some(self.apply_budget(long_term, session_blocks, new_obs, channel)))
    }

    /// A token budget caps the total (§4.5.5). When exceeded, the oldest
    /// session-date block is truncated first, then (if that's exhausted)
    /// whole sections fall away in reverse fixed order
    /// (new-observations, then channel) — long-term is never touched.
    fn apply_budget(
        &self,
        long_term: Option<String>,
        mut session_blocks: Vec<SessionBlock>,
        mut new_obs: Option<String>,
        mut channel: Option<String>,
    ) -> String {
        loop {
            let mut sections: Vec<&str> = Vec::new();
            let session_section = if session_blocks.is_empty() {
                None
            } else {
                Some(render_session_from_blocks(&session_blocks))
            };
            if let Some(lt) = &long_term {
                sections.push(lt);
            }
            if let Some(s) = &session_section {
                sections.push(s);
            }
            if let Some(n) = &new_obs {
                sections.push(n);
            }
            if let Some(c) = &channel {
                sections.push(c);
            }
            let joined = sections.join("\n\n");

            if (self.count_tokens)(&joined) <= self.token_budget {
                return joined;
            }
            if !session_blocks.is_empty() {
                session_blocks.remove(0);
                continue;
            }
            if new_obs.take().is_some() {
                continue;
            }
            if channel.take().is_some() {
                continue;
            }
            return joined;
        }
    }
}

fn render_long_term(items: &[PersistentItem]) -> String {
    let body = items
        .iter()
        .map(|i| format!("{} {}", i.priority.emoji(), i.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<long-term-memory>\n{body}\n</long-term-memory>")
}

/// Groups session observations by `session_date`, oldest first (a
/// `BTreeMap` keyed on `YYYY-MM-DD` sorts chronologically), so the budget
/// pass can drop whole days starting with the oldest.
fn session_blocks(items: &[ObservationItem]) -> Vec<SessionBlock> {
    let today = Utc::now().date_naive();
    let mut by_date: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let suffix = relative_day_label(&item.session_date, today)
            .map(|s| format!(" {s}"))
            .unwrap_or_default();
        let line = format!("{} {}{}", item.priority.emoji(), item.content, suffix);
        by_date.entry(item.session_date.clone()).or_default().push(line);
    }
    by_date
        .into_values()
        .map(|lines| SessionBlock { text: lines.join("\n") })
        .collect()
}

fn render_session_from_blocks(blocks: &[SessionBlock]) -> String {
    let body = blocks
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("<observational-memory>\n{body}\n</observational-memory>")
}

fn render_new_observations(items: &[ObservationItem]) -> String {
    let body = items
        .iter()
        .map(|i| format!("{} {}", i.priority.emoji(), i.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<new-observations>\n{body}\n</new-observations>")
}

fn render_channel(block: &ChannelObservationBlock) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(digest) = &block.digest {
        if !digest.is_empty() {
            parts.push(digest.clone());
        }
    }
    parts.extend(block.recent_channel.iter().cloned());
    parts.extend(block.recent_thread.iter().cloned());
    if parts.is_empty() {
        return None;
    }
    Some(format!(
        "<channel-observation>\n{}\n</channel-observation>",
        parts.join("\n")
    ))
}

/// Korean relative-day annotations: 오늘 (today), 어제 (yesterday), N일 전 (N days ago).
fn relative_day_label(session_date: &str, today: NaiveDate) -> Option<String> {
    let date = NaiveDate::parse_from_str(session_date, "%Y-%m-%d").ok()?;
    let days = (today - date).num_days();
    Some(match days {
        0 => "(\u{C624}\u{B298})".to_string(),
        1 => "(\u{C5B4}\u{C81C})".to_string(),
        n if n > 1 => format!("({n}\u{C77C} \u{C804})"),
        _ => return None,
    })
}
