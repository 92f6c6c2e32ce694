use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle of a queued notification request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Sent | QueueStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    High,
    #[default]
    #[serde(other)]
    Normal,
}

/// One persisted notification-send request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub status: QueueStatus,
    #[serde(default)]
    pub priority: QueuePriority,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl QueueEntry {
    /// A fresh pending entry, as a client would enqueue it
    pub fn pending(
        id: impl Into<String>,
        recipient_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            recipient_id: recipient_id.into(),
            title: Some(title.into()),
            body: Some(body.into()),
            data: Map::new(),
            status: QueueStatus::Pending,
            priority: QueuePriority::Normal,
            created_at: Some(created_at),
            processed_at: None,
            sent_at: None,
            failed_at: None,
            message_id: None,
            error: None,
            error_code: None,
        }
    }

    /// When the entry reached `sent` or `failed`
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            QueueStatus::Sent => self.sent_at,
            QueueStatus::Failed => self.failed_at,
            _ => None,
        }
    }
}

/// Failure detail recorded on a queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFailure {
    pub error: String,
    pub error_code: Option<String>,
}

impl QueueFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_code: None,
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.error_code = code;
        self
    }
}

/// Repository for the notification queue.
///
/// Status writes are conditional: `claim_pending` only succeeds from
/// `pending`, and `mark_sent`/`mark_failed` only from `processing`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn get_entry(&self, entry_id: &str) -> DomainResult<Option<QueueEntry>>;

    /// Move `pending` -> `processing`. Returns `None` when the entry is absent
    /// or no longer pending.
    async fn claim_pending(
        &self,
        entry_id: &str,
        claimed_at: DateTime<Utc>,
    ) -> DomainResult<Option<QueueEntry>>;

    async fn mark_sent(
        &self,
        entry_id: &str,
        message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn mark_failed(
        &self,
        entry_id: &str,
        failure: QueueFailure,
        failed_at: DateTime<Utc>,
    ) -> DomainResult<()>;

    /// Terminal entries created strictly before `cutoff`
    async fn list_terminal_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<QueueEntry>>;

    /// Delete the given entries, returning how many existed
    async fn delete_entries(&self, entry_ids: Vec<String>) -> DomainResult<usize>;
}
