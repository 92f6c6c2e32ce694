//! Request validation backed by garde.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Validate a request struct, collapsing the garde report into a single
/// `DomainError::ValidationError`.
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(describe_report(&report)))
}

fn describe_report(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            if path.is_empty() {
                error.message().to_string()
            } else {
                format!("{} {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct TokenRequest {
        #[garde(length(min = 1))]
        user_id: String,
        #[garde(length(min = 1))]
        fcm_token: String,
    }

    #[test]
    fn test_valid_request_passes() {
        let request = TokenRequest {
            user_id: "u1".to_string(),
            fcm_token: "tok".to_string(),
        };
        assert!(validate_struct(&request).is_ok());
    }

    #[test]
    fn test_every_invalid_field_is_reported() {
        let request = TokenRequest {
            user_id: String::new(),
            fcm_token: String::new(),
        };
        match validate_struct(&request) {
            Err(DomainError::ValidationError(message)) => {
                assert!(message.contains("user_id"));
                assert!(message.contains("fcm_token"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
