use serde::{Deserialize, Serialize};
use std::fmt;

/// Slack thread timestamp, the primary key for a session.
///
/// Opaque from this crate's point of view — whatever the transport hands us.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ThreadTs(pub String);

impl ThreadTs {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A thread_ts doubles as a filename component; this must not contain `/`.
    pub fn is_safe_for_filename(&self) -> bool {
        !self.0.is_empty() && !self.0.contains('/') && !self.0.contains("..")
    }
}

impl fmt::Display for ThreadTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ThreadTs {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadTs {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlackUserId(pub String);

impl SlackUserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlackUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SlackUserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SlackUserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque session identifier assigned by the engine, not by us.
///
/// Starts unassigned on a brand-new session and may be rotated (never
/// split) on compaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct EngineSessionId(pub Option<String>);

impl EngineSessionId {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_assigned(&self) -> bool {
        self.0.is_some()
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Two-role model: admins bypass all gating, viewers are subject to the
/// full intervention/permission surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    Viewer,
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "viewer" => Ok(UserRole::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Thread,
    Channel,
    Hybrid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("viewer".parse::<UserRole>().unwrap(), UserRole::Viewer);
        assert!("root".parse::<UserRole>().is_err());
    }

    #[test]
    fn thread_ts_filename_safety() {
        assert!(ThreadTs::from("1234567890.123456").is_safe_for_filename());
        assert!(!ThreadTs::from("../etc/passwd").is_safe_for_filename());
        assert!(!ThreadTs::from("a/b").is_safe_for_filename());
    }
}
