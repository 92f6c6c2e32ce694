use crate::domain::formatter::FormattedNotification;
use chrono::{SecondsFormat, Utc};
use common::domain::{
    DeliveryStats, NewNotification, NotificationRepository, PushMessage, PushProvider, User,
    UserRepository,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";
pub const USER_NOT_FOUND: &str = "user not found";

/// Result of one delivery attempt. Never an error: every outcome is a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the push provider
    Sent { message_id: String },
    /// Recipient has no push token; only the in-app record was written
    Fallback,
    Failed { error: String, code: Option<String> },
}

impl DeliveryOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        DeliveryOutcome::Failed {
            error: error.into(),
            code: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent { .. })
    }
}

/// Sends formatted notifications to users and keeps the in-app audit trail
pub struct DeliveryDispatcher {
    users: Arc<dyn UserRepository>,
    notifications: Arc<dyn NotificationRepository>,
    provider: Arc<dyn PushProvider>,
    stats: Arc<DeliveryStats>,
}

impl DeliveryDispatcher {
    pub fn new(
        users: Arc<dyn UserRepository>,
        notifications: Arc<dyn NotificationRepository>,
        provider: Arc<dyn PushProvider>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            users,
            notifications,
            provider,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    /// Look up the recipient and deliver to them
    #[instrument(skip(self, notification), fields(recipient_id = %recipient_id, notification_type = %notification.notification_type))]
    pub async fn deliver(
        &self,
        recipient_id: &str,
        notification: &FormattedNotification,
    ) -> DeliveryOutcome {
        match self.users.get_user(recipient_id).await {
            Ok(Some(user)) => self.deliver_to_user(&user, notification).await,
            Ok(None) => {
                warn!(recipient_id = %recipient_id, "recipient not found");
                self.stats.record_failed();
                DeliveryOutcome::failed(USER_NOT_FOUND)
            }
            Err(e) => {
                warn!(recipient_id = %recipient_id, error = %e, "failed to load recipient");
                self.stats.record_failed();
                DeliveryOutcome::failed(e.to_string())
            }
        }
    }

    /// Deliver to an already loaded user record
    pub async fn deliver_to_user(
        &self,
        user: &User,
        notification: &FormattedNotification,
    ) -> DeliveryOutcome {
        let Some(token) = user.push_token() else {
            info!(
                recipient = %user.display_name(),
                "no push token, storing in-app notification only"
            );
            self.record(&user.id, notification).await;
            self.stats.record_failed();
            return DeliveryOutcome::Fallback;
        };

        let message = PushMessage {
            token: token.to_string(),
            title: notification.title.clone(),
            body: notification.body.clone(),
            data: outbound_data(notification),
            hints: notification.hints.clone(),
        };

        match self.provider.send(message).await {
            Ok(message_id) => {
                debug!(
                    recipient = %user.display_name(),
                    message_id = %message_id,
                    "push delivered"
                );
                self.stats.record_sent();
                self.record(&user.id, notification).await;
                DeliveryOutcome::Sent { message_id }
            }
            Err(e) => {
                warn!(
                    recipient = %user.display_name(),
                    error = %e,
                    code = e.code.as_deref().unwrap_or("none"),
                    "push delivery failed"
                );
                self.stats.record_failed();
                DeliveryOutcome::Failed {
                    error: e.message,
                    code: e.code,
                }
            }
        }
    }

    /// Append the in-app record; failures are logged and never change the outcome
    async fn record(&self, recipient_id: &str, notification: &FormattedNotification) {
        let data: Map<String, Value> = notification
            .data
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let record = NewNotification {
            recipient_id: recipient_id.to_string(),
            title: notification.title.clone(),
            body: notification.body.clone(),
            notification_type: notification.notification_type.clone(),
            student_id: notification.student_id.clone(),
            student_name: notification.student_name.clone(),
            data,
        };

        if let Err(e) = self.notifications.append(record).await {
            warn!(recipient_id = %recipient_id, error = %e, "failed to store notification record");
        }
    }
}

/// Data sent with the push: the notification's own data plus the keys every
/// client handler relies on
fn outbound_data(notification: &FormattedNotification) -> std::collections::BTreeMap<String, String> {
    let mut data = notification.data.clone();
    data.entry("type".to_string())
        .or_insert_with(|| notification.notification_type.clone());
    data.insert("click_action".to_string(), CLICK_ACTION.to_string());
    data.insert(
        "timestamp".to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    data
}
