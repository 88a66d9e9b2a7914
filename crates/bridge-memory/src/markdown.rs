//! Legacy `.md` -> `.json` migration for observation and persistent memory
//! files (§6 "Legacy .md equivalents", §8 round-trip property).

use regex::Regex;
use std::sync::OnceLock;

use chrono::Utc;

use crate::ids::{generate_ltm_id, generate_obs_id};
use crate::types::{ObservationItem, ObservationSource, PersistentItem, Priority};

fn date_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^##\s*\[(\d{4}-\d{2}-\d{2})\]").unwrap())
}

fn label_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(HIGH|MEDIUM|LOW)\s*[-\u{2013}\u{2014}]?\s*").unwrap())
}

const PRIORITY_EMOJIS: [&str; 3] = ["\u{1F534}", "\u{1F7E1}", "\u{1F7E2}"];

fn strip_priority_prefix(line: &str) -> Option<(Priority, String)> {
    for emoji in PRIORITY_EMOJIS {
        if let Some(rest) = line.strip_prefix(emoji) {
            let content = label_strip_re().replace(rest.trim(), "").trim().to_string();
            return Some((Priority::from_emoji(emoji).unwrap(), content));
        }
    }
    None
}

/// Parse a legacy observation markdown document into `ObservationItem`s,
/// grouping lines under the most recent `## [YYYY-MM-DD]` header seen.
pub fn parse_md_observations(md_text: &str) -> Vec<ObservationItem> {
    if md_text.trim().is_empty() {
        return Vec::new();
    }

    let mut items: Vec<ObservationItem> = Vec::new();
    let mut current_date = Utc::now().format("%Y-%m-%d").to_string();
    let now_iso = Utc::now().to_rfc3339();

    for line in md_text.trim().lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }

        if let Some(cap) = date_header_re().captures(stripped) {
            current_date = cap[1].to_string();
            continue;
        }

        if let Some((priority, content)) = strip_priority_prefix(stripped) {
            if content.is_empty() {
                continue;
            }
            let existing_ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
            let id = generate_obs_id(&existing_ids, &current_date);
            items.push(ObservationItem {
                id,
                priority,
                content,
                session_date: current_date.clone(),
                created_at: now_iso.clone(),
                source: ObservationSource::Migrated,
            });
        }
    }

    items
}

/// Parse a legacy persistent-memory markdown document. Lines without a
/// priority emoji default to medium priority; heading/divider lines are
/// skipped.
pub fn parse_md_persistent(md_text: &str) -> Vec<PersistentItem> {
    if md_text.trim().is_empty() {
        return Vec::new();
    }

    let mut items: Vec<PersistentItem> = Vec::new();
    let now_iso = Utc::now().to_rfc3339();

    for line in md_text.trim().lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }

        let (priority, content) = match strip_priority_prefix(stripped) {
            Some(pair) => pair,
            None => {
                if stripped.starts_with('#') || stripped.starts_with("---") {
                    continue;
                }
                (Priority::Medium, stripped.to_string())
            }
        };

        if content.is_empty() {
            continue;
        }

        let existing_ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let id = generate_ltm_id(&existing_ids, &Utc::now().format("%Y-%m-%d").to_string());
        items.push(PersistentItem {
            id,
            priority,
            content,
            promoted_at: now_iso.clone(),
            source_obs_ids: Vec::new(),
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dated_observation_blocks() {
        let md = "## [2026-07-20]\n\u{1F534} HIGH - server is down\n\u{1F7E2} user likes dark mode\n";
        let items = parse_md_observations(md);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].session_date, "2026-07-20");
        assert_eq!(items[0].content, "server is down");
        assert_eq!(items[0].priority, Priority::High);
        assert_eq!(items[1].priority, Priority::Low);
        assert_eq!(items[0].id, "obs_20260720_000");
        assert_eq!(items[1].id, "obs_20260720_001");
    }

    #[test]
    fn ignores_lines_without_priority_marker() {
        let md = "## [2026-07-20]\nthis is just a note with no emoji\n";
        assert!(parse_md_observations(md).is_empty());
    }

    #[test]
    fn persistent_defaults_unmarked_lines_to_medium() {
        let md = "# Long-term memory\n---\nUser prefers terse replies\n\u{1F534} Never deploy on Fridays\n";
        let items = parse_md_persistent(md);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].priority, Priority::Medium);
        assert_eq!(items[1].priority, Priority::High);
    }

    #[test]
    fn empty_input_yields_no_items() {
        assert!(parse_md_observations("").is_empty());
        assert!(parse_md_persistent("   \n  ").is_empty());
    }
}
