use crate::domain::{PushError, PushMessage, PushProvider};
use async_trait::async_trait;
use tracing::info;

/// Push provider that only logs what it would send.
///
/// Used when no FCM credentials are configured so the rest of the pipeline
/// (queue transitions, audit records) still runs end to end.
#[derive(Debug, Clone, Default)]
pub struct DryRunPushProvider;

impl DryRunPushProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushProvider for DryRunPushProvider {
    async fn send(&self, message: PushMessage) -> Result<String, PushError> {
        let message_id = format!("dry-run-{}", xid::new());
        info!(
            message_id = %message_id,
            title = %message.title,
            channel_id = %message.hints.android.channel_id,
            data_keys = message.data.len(),
            "dry run: push not delivered"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeliveryHints;

    #[tokio::test]
    async fn test_dry_run_returns_unique_ids() {
        let provider = DryRunPushProvider::new();
        let message = PushMessage {
            token: "tok".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            data: Default::default(),
            hints: DeliveryHints::default(),
        };

        let a = provider.send(message.clone()).await.unwrap();
        let b = provider.send(message).await.unwrap();
        assert!(a.starts_with("dry-run-"));
        assert_ne!(a, b);
    }
}
