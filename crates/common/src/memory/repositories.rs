use crate::domain::{
    Bus, BusRepository, Collection, Document, DomainError, DomainResult, GeoPoint, LocationFix,
    NewNotification, NotificationRecord, NotificationRepository, QueueEntry, QueueFailure,
    QueueRepository, QueueStatus, StopReason, StoredLocation, Student, StudentRepository, User,
    UserRepository, UserType,
};
use crate::memory::{InMemoryDocumentStore, UpdateOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339())
}

fn to_field<T: Serialize>(id: &str, value: &T) -> DomainResult<Value> {
    serde_json::to_value(value).map_err(|e| DomainError::InvalidDocument(id.to_string(), e.to_string()))
}

/// Decode every document, skipping (and logging) the ones that don't fit `T`
fn decode_all<T: DeserializeOwned>(collection: Collection, docs: Vec<Document>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection = %collection, error = %e, "skipping undecodable document");
                None
            }
        })
        .collect()
}

#[async_trait]
impl UserRepository for InMemoryDocumentStore {
    async fn get_user(&self, user_id: &str) -> DomainResult<Option<User>> {
        self.get(Collection::Users, user_id)
            .await
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn list_users_by_type(
        &self,
        user_types: Vec<UserType>,
        active_only: bool,
    ) -> DomainResult<Vec<User>> {
        let users: Vec<User> = decode_all(Collection::Users, self.list(Collection::Users).await);
        Ok(users
            .into_iter()
            .filter(|u| user_types.contains(&u.user_type))
            .filter(|u| !active_only || u.is_active)
            .collect())
    }

    async fn update_push_token(
        &self,
        user_id: &str,
        fcm_token: &str,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let outcome = self
            .update_if(Collection::Users, user_id, |doc| {
                doc.fields
                    .insert("fcmToken".to_string(), Value::String(fcm_token.to_string()));
                doc.fields
                    .insert("lastTokenUpdate".to_string(), timestamp(updated_at));
                true
            })
            .await;

        match outcome {
            UpdateOutcome::Missing => Err(DomainError::UserNotFound(user_id.to_string())),
            _ => Ok(()),
        }
    }

    async fn clear_push_token(
        &self,
        user_id: &str,
        logged_out_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let outcome = self
            .update_if(Collection::Users, user_id, |doc| {
                doc.fields.remove("fcmToken");
                doc.fields
                    .insert("lastLogout".to_string(), timestamp(logged_out_at));
                true
            })
            .await;

        match outcome {
            UpdateOutcome::Missing => Err(DomainError::UserNotFound(user_id.to_string())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StudentRepository for InMemoryDocumentStore {
    async fn get_student(&self, student_id: &str) -> DomainResult<Option<Student>> {
        self.get(Collection::Students, student_id)
            .await
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn list_students_by_bus(&self, bus_id: &str) -> DomainResult<Vec<Student>> {
        let docs = self
            .query(Collection::Students, |doc| doc.get_str("busId") == Some(bus_id))
            .await;
        Ok(decode_all(Collection::Students, docs))
    }

    async fn parent_has_student_on_bus(
        &self,
        parent_id: &str,
        bus_id: &str,
    ) -> DomainResult<bool> {
        let matches = self
            .query(Collection::Students, |doc| {
                doc.get_str("busId") == Some(bus_id) && doc.get_str("parentId") == Some(parent_id)
            })
            .await;
        Ok(!matches.is_empty())
    }
}

#[async_trait]
impl BusRepository for InMemoryDocumentStore {
    async fn get_bus(&self, bus_id: &str) -> DomainResult<Option<Bus>> {
        self.get(Collection::Buses, bus_id)
            .await
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn mark_tracking_started(
        &self,
        bus_id: &str,
        supervisor_id: &str,
        location: GeoPoint,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let last_location = to_field(
            bus_id,
            &StoredLocation {
                latitude: location.latitude,
                longitude: location.longitude,
                speed: None,
                heading: None,
                timestamp: Some(at),
            },
        )?;

        let outcome = self
            .update_if(Collection::Buses, bus_id, |doc| {
                doc.fields.insert("isTracking".to_string(), Value::Bool(true));
                doc.fields.insert("lastLocation".to_string(), last_location);
                doc.fields.insert(
                    "currentSupervisorId".to_string(),
                    Value::String(supervisor_id.to_string()),
                );
                doc.fields.insert("trackingStartedAt".to_string(), timestamp(at));
                true
            })
            .await;

        match outcome {
            UpdateOutcome::Missing => Err(DomainError::BusNotFound(bus_id.to_string())),
            _ => Ok(()),
        }
    }

    async fn record_location(
        &self,
        bus_id: &str,
        fix: LocationFix,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let last_location = to_field(
            bus_id,
            &StoredLocation {
                latitude: fix.point.latitude,
                longitude: fix.point.longitude,
                speed: Some(fix.speed),
                heading: Some(fix.heading),
                timestamp: Some(at),
            },
        )?;

        let outcome = self
            .update_if(Collection::Buses, bus_id, |doc| {
                doc.fields.insert("lastLocation".to_string(), last_location);
                true
            })
            .await;

        match outcome {
            UpdateOutcome::Missing => Err(DomainError::BusNotFound(bus_id.to_string())),
            _ => Ok(()),
        }
    }

    async fn mark_tracking_stopped(
        &self,
        bus_id: &str,
        reason: StopReason,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let stamp_field = match reason {
            StopReason::Stopped => "trackingStoppedAt",
            StopReason::SupervisorDisconnected => "disconnectedAt",
        };

        let outcome = self
            .update_if(Collection::Buses, bus_id, |doc| {
                doc.fields.insert("isTracking".to_string(), Value::Bool(false));
                doc.fields.insert(stamp_field.to_string(), timestamp(at));
                true
            })
            .await;

        match outcome {
            UpdateOutcome::Missing => Err(DomainError::BusNotFound(bus_id.to_string())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl QueueRepository for InMemoryDocumentStore {
    async fn get_entry(&self, entry_id: &str) -> DomainResult<Option<QueueEntry>> {
        self.get(Collection::NotificationQueue, entry_id)
            .await
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn claim_pending(
        &self,
        entry_id: &str,
        claimed_at: DateTime<Utc>,
    ) -> DomainResult<Option<QueueEntry>> {
        let outcome = self
            .update_if(Collection::NotificationQueue, entry_id, |doc| {
                if doc.get_str("status") != Some(QueueStatus::Pending.as_str()) {
                    return false;
                }
                doc.fields.insert(
                    "status".to_string(),
                    Value::String(QueueStatus::Processing.as_str().to_string()),
                );
                doc.fields
                    .insert("processedAt".to_string(), timestamp(claimed_at));
                true
            })
            .await;

        match outcome {
            UpdateOutcome::Updated(doc) => Ok(Some(doc.decode()?)),
            UpdateOutcome::Skipped(_) => {
                debug!(entry_id = %entry_id, "queue entry already claimed");
                Ok(None)
            }
            UpdateOutcome::Missing => Ok(None),
        }
    }

    async fn mark_sent(
        &self,
        entry_id: &str,
        message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let outcome = self
            .update_if(Collection::NotificationQueue, entry_id, |doc| {
                if doc.get_str("status") != Some(QueueStatus::Processing.as_str()) {
                    return false;
                }
                doc.fields.insert(
                    "status".to_string(),
                    Value::String(QueueStatus::Sent.as_str().to_string()),
                );
                doc.fields.insert("sentAt".to_string(), timestamp(sent_at));
                doc.fields.insert(
                    "messageId".to_string(),
                    Value::String(message_id.to_string()),
                );
                true
            })
            .await;

        transition_result(entry_id, QueueStatus::Sent, outcome)
    }

    async fn mark_failed(
        &self,
        entry_id: &str,
        failure: QueueFailure,
        failed_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let outcome = self
            .update_if(Collection::NotificationQueue, entry_id, |doc| {
                if doc.get_str("status") != Some(QueueStatus::Processing.as_str()) {
                    return false;
                }
                doc.fields.insert(
                    "status".to_string(),
                    Value::String(QueueStatus::Failed.as_str().to_string()),
                );
                doc.fields
                    .insert("error".to_string(), Value::String(failure.error));
                if let Some(code) = failure.error_code {
                    doc.fields.insert("errorCode".to_string(), Value::String(code));
                }
                doc.fields.insert("failedAt".to_string(), timestamp(failed_at));
                true
            })
            .await;

        transition_result(entry_id, QueueStatus::Failed, outcome)
    }

    async fn list_terminal_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<QueueEntry>> {
        let entries: Vec<QueueEntry> = decode_all(
            Collection::NotificationQueue,
            self.list(Collection::NotificationQueue).await,
        );
        Ok(entries
            .into_iter()
            .filter(|e| e.status.is_terminal())
            // entries closed without a terminal timestamp age from creation
            .filter(|e| e.terminal_at().or(e.created_at).is_some_and(|at| at < cutoff))
            .collect())
    }

    async fn delete_entries(&self, entry_ids: Vec<String>) -> DomainResult<usize> {
        let mut deleted = 0;
        for id in &entry_ids {
            if self.delete(Collection::NotificationQueue, id).await.is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn transition_result(
    entry_id: &str,
    target: QueueStatus,
    outcome: UpdateOutcome,
) -> DomainResult<()> {
    match outcome {
        UpdateOutcome::Updated(_) => Ok(()),
        UpdateOutcome::Missing => Err(DomainError::QueueEntryNotFound(entry_id.to_string())),
        UpdateOutcome::Skipped(doc) => Err(DomainError::InvalidQueueTransition(
            entry_id.to_string(),
            doc.get_str("status").unwrap_or("unknown").to_string(),
            target.as_str().to_string(),
        )),
    }
}

#[async_trait]
impl NotificationRepository for InMemoryDocumentStore {
    async fn append(&self, notification: NewNotification) -> DomainResult<NotificationRecord> {
        let record = NotificationRecord {
            id: xid::new().to_string(),
            recipient_id: notification.recipient_id,
            title: notification.title,
            body: notification.body,
            notification_type: notification.notification_type,
            student_id: notification.student_id,
            student_name: notification.student_name,
            data: notification.data,
            is_read: false,
            timestamp: Utc::now(),
        };

        self.put_record(Collection::Notifications, &record.id, &record)
            .await?;
        Ok(record)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: &str,
    ) -> DomainResult<Vec<NotificationRecord>> {
        let docs = self
            .query(Collection::Notifications, |doc| {
                doc.get_str("recipientId") == Some(recipient_id)
            })
            .await;
        let mut records: Vec<NotificationRecord> = decode_all(Collection::Notifications, docs);
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
