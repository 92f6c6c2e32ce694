use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// In-app notification / delivery audit record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Input for appending a notification record (id and timestamp are assigned)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewNotification {
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub notification_type: String,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub data: Map<String, Value>,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn append(&self, notification: NewNotification) -> DomainResult<NotificationRecord>;

    /// Records for a recipient, oldest first
    async fn list_for_recipient(&self, recipient_id: &str)
        -> DomainResult<Vec<NotificationRecord>>;
}
