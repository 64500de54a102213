//! DTOs the engine itself reads from the service.
//!
//! Resource payloads (checklists, tasks, notes) belong to the endpoint layer
//! built on top of `CheckvistClient::execute`; only the account record is
//! defined here because it comes from the auth surface.

use serde::{Deserialize, Serialize};

/// The authenticated account, from `/auth/curr_user.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ignores_unknown_fields() {
        let user: User = serde_json::from_str(
            r#"{"id":12345,"username":"testuser","email":"test@example.com","pro":true}"#,
        )
        .unwrap();
        assert_eq!(user.id, 12345);
        assert_eq!(user.username, "testuser");
        assert_eq!(user.email, "test@example.com");
    }

    #[test]
    fn user_email_is_optional() {
        let user: User = serde_json::from_str(r#"{"id":1,"username":"a"}"#).unwrap();
        assert!(user.email.is_empty());
    }
}
