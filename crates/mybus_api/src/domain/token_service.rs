use chrono::Utc;
use common::domain::{DomainResult, UserRepository};
use common::garde::validate_struct;
use garde::Validate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct LogoutRequest {
    #[garde(length(min = 1))]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateTokenRequest {
    #[garde(length(min = 1))]
    pub user_id: String,
    #[garde(length(min = 1))]
    pub fcm_token: String,
}

/// Registers and removes device push tokens on user records
pub struct TokenService {
    users: Arc<dyn UserRepository>,
}

impl TokenService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Drop the user's push token so no further pushes reach the device
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn logout(&self, request: LogoutRequest) -> DomainResult<()> {
        validate_struct(&request)?;
        self.users
            .clear_push_token(&request.user_id, Utc::now())
            .await?;
        info!("push token removed");
        Ok(())
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn update_token(&self, request: UpdateTokenRequest) -> DomainResult<()> {
        validate_struct(&request)?;
        self.users
            .update_push_token(&request.user_id, &request.fcm_token, Utc::now())
            .await?;
        info!(token_prefix = %token_prefix(&request.fcm_token), "push token updated");
        Ok(())
    }
}

fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(12) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DomainError, MockUserRepository};

    #[tokio::test]
    async fn test_update_token_writes_token() {
        let mut users = MockUserRepository::new();
        users
            .expect_update_push_token()
            .withf(|id, token, _| id == "u1" && token == "device-token")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let service = TokenService::new(Arc::new(users));

        service
            .update_token(UpdateTokenRequest {
                user_id: "u1".to_string(),
                fcm_token: "device-token".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected_before_storage() {
        let service = TokenService::new(Arc::new(MockUserRepository::new()));

        let result = service
            .update_token(UpdateTokenRequest {
                user_id: "u1".to_string(),
                fcm_token: String::new(),
            })
            .await;
        assert!(matches!(result, Err(DomainError::ValidationError(_))));

        let result = service.logout(LogoutRequest::default()).await;
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_logout_for_unknown_user_is_not_found() {
        let mut users = MockUserRepository::new();
        users
            .expect_clear_push_token()
            .returning(|id, _| Err(DomainError::UserNotFound(id.to_string())));
        let service = TokenService::new(Arc::new(users));

        let result = service
            .logout(LogoutRequest {
                user_id: "ghost".to_string(),
            })
            .await;

        assert!(matches!(result, Err(DomainError::UserNotFound(_))));
    }

    #[test]
    fn test_token_prefix_is_char_safe() {
        assert_eq!(token_prefix("short"), "short");
        assert_eq!(token_prefix("abcdefghijklmnop"), "abcdefghijkl");
    }
}
