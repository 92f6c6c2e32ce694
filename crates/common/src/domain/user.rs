use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an account in the school-bus system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Parent,
    Admin,
    Supervisor,
    #[default]
    #[serde(other)]
    Other,
}

/// User account with its registered push token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_token_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_logout: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl User {
    /// Name used in log lines: name, then email, then id
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }

    /// Token usable for delivery; empty strings count as absent
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Repository trait for user lookups and push-token bookkeeping
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: &str) -> DomainResult<Option<User>>;

    /// Users whose type is one of `user_types`, optionally only active ones
    async fn list_users_by_type(
        &self,
        user_types: Vec<UserType>,
        active_only: bool,
    ) -> DomainResult<Vec<User>>;

    /// Store a push token; fails with `UserNotFound` for unknown users
    async fn update_push_token(
        &self,
        user_id: &str,
        fcm_token: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<()>;

    /// Remove the push token; fails with `UserNotFound` for unknown users
    async fn clear_push_token(&self, user_id: &str, logged_out_at: DateTime<Utc>)
        -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(token: Option<&str>) -> User {
        User {
            id: "u1".to_string(),
            name: None,
            email: Some("p@example.com".to_string()),
            user_type: UserType::Parent,
            is_active: true,
            fcm_token: token.map(str::to_string),
            last_token_update: None,
            last_logout: None,
        }
    }

    #[test]
    fn test_empty_token_is_absent() {
        assert_eq!(user(Some("")).push_token(), None);
        assert_eq!(user(None).push_token(), None);
        assert_eq!(user(Some("tok")).push_token(), Some("tok"));
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        assert_eq!(user(None).display_name(), "p@example.com");
    }

    #[test]
    fn test_unknown_user_type_decodes_as_other() {
        let parsed: UserType = serde_json::from_str("\"driver\"").unwrap();
        assert_eq!(parsed, UserType::Other);
    }
}
