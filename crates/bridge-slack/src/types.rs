use bridge_core::types::UserRole;

/// Transport-normalized view of an ambient (non-mention) channel message,
/// handed to a `ChannelObserverRunner` for buffering.
#[derive(Debug, Clone)]
pub struct IngestedMessage {
    pub ts: String,
    pub user: String,
    pub text: String,
    pub thread_ts: Option<String>,
}

/// Resolves a Slack user ID to a role: admins are named explicitly in
/// config, everyone else is a viewer.
pub fn resolve_role(user_id: &str, admin_users: &[String]) -> UserRole {
    if admin_users.iter().any(|admin| admin == user_id) {
        UserRole::Admin
    } else {
        UserRole::Viewer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_membership_grants_admin_role() {
        let admins = vec!["U1".to_string(), "U2".to_string()];
        assert_eq!(resolve_role("U1", &admins), UserRole::Admin);
        assert_eq!(resolve_role("U3", &admins), UserRole::Viewer);
    }
}
