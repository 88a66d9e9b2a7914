use serde::{Deserialize, Serialize};

use bridge_core::types::EngineSessionId;

/// A single call into the engine.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub thread_ts: String,
    pub prompt: String,
    pub session_id: EngineSessionId,
    pub model: String,
    /// Optional system-prompt override; `None` uses the engine's own default.
    pub system_prompt: Option<String>,
}

/// Token accounting carried on the terminal `Result` event (§6); the same
/// shape `bridge_core::usage::Usage` feeds into the context-window gauge.
pub type EngineUsage = bridge_core::usage::Usage;

/// Why a compaction event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactTrigger {
    Auto,
    Manual,
}

/// Rust encoding of the engine's streaming NDJSON protocol (§6). One value
/// per line parsed from the subprocess's stdout (or per remote SSE frame).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Init {
        session_id: String,
    },
    AssistantDelta {
        text: String,
    },
    Compact {
        trigger: CompactTrigger,
        message: String,
    },
    Result {
        output: String,
        session_id: Option<String>,
        usage: Option<EngineUsage>,
        interrupted: bool,
    },
}

impl EngineEvent {
    /// Parses one line of the NDJSON protocol. Unknown `type` values are
    /// ignored (return `Ok(None)`), matching §6's "unknown objects are
    /// ignored" rule; malformed JSON is a hard parse error.
    pub fn parse_line(line: &str) -> crate::error::Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| crate::error::EngineError::Parse(format!("{e}: {trimmed}")))?;

        let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match kind {
            "system" => {
                if value.get("subtype").and_then(|v| v.as_str()) != Some("init") {
                    return Ok(None);
                }
                let session_id = value
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Some(EngineEvent::Init { session_id }))
            }
            "assistant" => {
                let text = value
                    .pointer("/message/content")
                    .and_then(|v| v.as_array())
                    .map(|blocks| {
                        blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                if text.is_empty() {
                    return Ok(None);
                }
                Ok(Some(EngineEvent::AssistantDelta { text }))
            }
            "compact" => {
                let trigger = match value.get("trigger").and_then(|v| v.as_str()) {
                    Some("manual") => CompactTrigger::Manual,
                    _ => CompactTrigger::Auto,
                };
                let message = value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Some(EngineEvent::Compact { trigger, message }))
            }
            "result" => {
                let output = value
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let session_id = value
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let usage = value
                    .get("usage")
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
                let interrupted = value
                    .get("interrupted")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                Ok(Some(EngineEvent::Result {
                    output,
                    session_id,
                    usage,
                    interrupted,
                }))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_init_event() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#;
        let event = EngineEvent::parse_line(line).unwrap().unwrap();
        assert!(matches!(event, EngineEvent::Init { session_id } if session_id == "abc-123"));
    }

    #[test]
    fn parses_assistant_delta() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#;
        let event = EngineEvent::parse_line(line).unwrap().unwrap();
        assert!(matches!(event, EngineEvent::AssistantDelta { text } if text == "hi"));
    }

    #[test]
    fn parses_result_with_usage() {
        let line = r#"{"type":"result","result":"done","session_id":"s1","usage":{"input_tokens":10,"output_tokens":5},"interrupted":false}"#;
        let event = EngineEvent::parse_line(line).unwrap().unwrap();
        match event {
            EngineEvent::Result {
                output,
                session_id,
                usage,
                interrupted,
            } => {
                assert_eq!(output, "done");
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(usage.unwrap().input_tokens, 10);
                assert!(!interrupted);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_ignored() {
        let line = r#"{"type":"thinking","text":"pondering"}"#;
        assert!(EngineEvent::parse_line(line).unwrap().is_none());
    }

    #[test]
    fn blank_line_is_ignored() {
        assert!(EngineEvent::parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = EngineEvent::parse_line("{not json").unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Parse(_)));
    }
}
