//! In-band marker extraction from final engine output (§6).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    File(String),
    Attach(String),
    ImageGen(String),
    ListRun(String),
    Update,
    Restart,
    Summary(String),
    Details(String),
}

fn file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*FILE:\s*(.+?)\s*-->").unwrap())
}
fn attach_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*ATTACH:\s*(.+?)\s*-->").unwrap())
}
fn image_gen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*IMAGE_GEN:\s*(.+?)\s*-->").unwrap())
}
fn list_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*LIST_RUN:\s*(.+?)\s*-->").unwrap())
}
fn update_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*UPDATE\s*-->").unwrap())
}
fn restart_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*RESTART\s*-->").unwrap())
}
fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<!--\s*SUMMARY\s*-->(.*?)<!--\s*/SUMMARY\s*-->").unwrap()
    })
}
fn details_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<!--\s*DETAILS\s*-->(.*?)<!--\s*/DETAILS\s*-->").unwrap()
    })
}

/// Extract every marker present in `text`, in order of appearance type
/// (not document order — callers that need positional order should
/// operate on the raw matches instead).
pub fn extract_markers(text: &str) -> Vec<Marker> {
    let mut out = Vec::new();
    for cap in file_re().captures_iter(text) {
        out.push(Marker::File(cap[1].to_string()));
    }
    for cap in attach_re().captures_iter(text) {
        out.push(Marker::Attach(cap[1].to_string()));
    }
    for cap in image_gen_re().captures_iter(text) {
        out.push(Marker::ImageGen(cap[1].to_string()));
    }
    for cap in list_run_re().captures_iter(text) {
        out.push(Marker::ListRun(cap[1].to_string()));
    }
    if update_re().is_match(text) {
        out.push(Marker::Update);
    }
    if restart_re().is_match(text) {
        out.push(Marker::Restart);
    }
    for cap in summary_re().captures_iter(text) {
        out.push(Marker::Summary(cap[1].trim().to_string()));
    }
    for cap in details_re().captures_iter(text) {
        out.push(Marker::Details(cap[1].trim().to_string()));
    }
    out
}

/// Strip all recognized marker spans out of `text`, leaving the prose
/// that should actually be shown to the user.
pub fn strip_markers(text: &str) -> String {
    let mut s = text.to_string();
    for re in [
        summary_re(),
        details_re(),
        file_re(),
        attach_re(),
        image_gen_re(),
        list_run_re(),
        update_re(),
        restart_re(),
    ] {
        s = re.replace_all(&s, "").to_string();
    }
    s.trim().to_string()
}

/// Replace literal backticks with U+02CB (modifier letter grave accent) so
/// engine output containing stray backticks doesn't break Slack's code
/// block rendering.
pub fn escape_backticks(text: &str) -> String {
    text.replace('`', "\u{02CB}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_file_and_attach() {
        let text = "done <!-- FILE: /tmp/out.png --> and <!-- ATTACH: /tmp/log.txt -->";
        let markers = extract_markers(text);
        assert!(markers.contains(&Marker::File("/tmp/out.png".into())));
        assert!(markers.contains(&Marker::Attach("/tmp/log.txt".into())));
    }

    #[test]
    fn extracts_summary_and_details() {
        let text = "<!-- SUMMARY -->short<!-- /SUMMARY --><!-- DETAILS -->long form<!-- /DETAILS -->";
        let markers = extract_markers(text);
        assert!(markers.contains(&Marker::Summary("short".into())));
        assert!(markers.contains(&Marker::Details("long form".into())));
    }

    #[test]
    fn strip_removes_all_marker_spans() {
        let text = "hello <!-- UPDATE --> world <!-- FILE: a.txt -->";
        assert_eq!(strip_markers(text), "hello  world");
    }

    #[test]
    fn backtick_escape() {
        assert_eq!(escape_backticks("`code`"), "\u{02CB}code\u{02CB}");
    }
}
