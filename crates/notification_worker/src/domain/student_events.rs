use crate::domain::change_handler::ChangeHandler;
use crate::domain::dispatcher::DeliveryDispatcher;
use crate::domain::formatter::{status_changed, student_data_updated};
use crate::domain::snapshot_differ::SnapshotCache;
use async_trait::async_trait;
use common::domain::{ChangeEvent, ChangeKind, DomainResult, Student};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns student record edits into status and data-update notifications
/// for the parent
pub struct StudentEventHandler {
    dispatcher: Arc<DeliveryDispatcher>,
    snapshots: SnapshotCache,
}

impl StudentEventHandler {
    pub fn new(dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self {
            dispatcher,
            snapshots: SnapshotCache::for_students(),
        }
    }

    pub async fn cached_students(&self) -> usize {
        self.snapshots.len().await
    }

    async fn on_modified(&self, event: ChangeEvent) -> DomainResult<()> {
        let id = event.document_id().to_string();
        let Some(diff) = self
            .snapshots
            .observe(&id, event.document.fields.clone())
            .await
        else {
            debug!(student_id = %id, "first sighting of student, cached");
            return Ok(());
        };

        if diff.is_empty() {
            return Ok(());
        }

        let student = match event.document.decode::<Student>() {
            Ok(student) => student,
            Err(e) => {
                warn!(student_id = %id, error = %e, "skipping malformed student");
                return Ok(());
            }
        };
        let Some(parent_id) = student.parent_id.as_deref() else {
            debug!(student_id = %id, "student has no parent, nothing to notify");
            return Ok(());
        };
        let name = student.display_name();

        if let Some(change) = &diff.status_change {
            info!(student_id = %id, old = %change.old, new = %change.new, "student status changed");
            self.dispatcher
                .deliver(
                    parent_id,
                    &status_changed(&student.id, name, &change.old, &change.new),
                )
                .await;
        }

        if !diff.changes.is_empty() {
            info!(student_id = %id, fields = diff.changes.len(), "student data updated");
            self.dispatcher
                .deliver(
                    parent_id,
                    &student_data_updated(&student.id, name, &diff.changes),
                )
                .await;
        }

        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for StudentEventHandler {
    async fn handle(&self, event: ChangeEvent) -> DomainResult<()> {
        match event.kind {
            ChangeKind::Added => {
                self.snapshots
                    .seed(event.document_id(), event.document.fields.clone())
                    .await;
                Ok(())
            }
            ChangeKind::Removed => {
                self.snapshots.forget(event.document_id()).await;
                Ok(())
            }
            ChangeKind::Modified => self.on_modified(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        Collection, DeliveryStats, Document, MockNotificationRepository, MockPushProvider,
        MockUserRepository, NotificationRecord, PushMessage, User, UserType,
    };
    use serde_json::json;

    fn student_doc(status: &str, grade: &str) -> Document {
        let fields = json!({
            "name": "Ali",
            "parentId": "p1",
            "grade": grade,
            "currentStatus": status
        });
        Document::new("s1", fields.as_object().unwrap().clone())
    }

    fn handler(users: MockUserRepository, provider: MockPushProvider) -> StudentEventHandler {
        let mut notifications = MockNotificationRepository::new();
        notifications.expect_append().returning(|n| {
            Ok(NotificationRecord {
                id: "n".to_string(),
                recipient_id: n.recipient_id,
                title: n.title,
                body: n.body,
                notification_type: n.notification_type,
                student_id: n.student_id,
                student_name: n.student_name,
                data: n.data,
                is_read: false,
                timestamp: chrono::Utc::now(),
            })
        });
        StudentEventHandler::new(Arc::new(DeliveryDispatcher::new(
            Arc::new(users),
            Arc::new(notifications),
            Arc::new(provider),
            Arc::new(DeliveryStats::new()),
        )))
    }

    fn parent_lookup(times: usize) -> MockUserRepository {
        let mut users = MockUserRepository::new();
        users.expect_get_user().times(times).returning(|_| {
            Ok(Some(User {
                id: "p1".to_string(),
                name: None,
                email: None,
                user_type: UserType::Parent,
                is_active: true,
                fcm_token: Some("tok".to_string()),
                last_token_update: None,
                last_logout: None,
            }))
        });
        users
    }

    #[tokio::test]
    async fn test_added_student_only_seeds_cache() {
        let handler = handler(MockUserRepository::new(), MockPushProvider::new());
        handler
            .handle(ChangeEvent::new(
                Collection::Students,
                ChangeKind::Added,
                student_doc("home", "3"),
            ))
            .await
            .unwrap();
        assert_eq!(handler.cached_students().await, 1);
    }

    #[tokio::test]
    async fn test_status_and_data_change_send_two_notifications() {
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .withf(|m: &PushMessage| {
                m.data.get("type").map(String::as_str) == Some("studentStatusChanged")
            })
            .times(1)
            .returning(|_| Ok("m1".to_string()));
        provider
            .expect_send()
            .withf(|m: &PushMessage| {
                m.data.get("type").map(String::as_str) == Some("student_data_update")
            })
            .times(1)
            .returning(|_| Ok("m2".to_string()));

        let handler = handler(parent_lookup(2), provider);
        handler
            .handle(ChangeEvent::replay(Collection::Students, student_doc("onBus", "3")))
            .await
            .unwrap();
        handler
            .handle(ChangeEvent::new(
                Collection::Students,
                ChangeKind::Modified,
                student_doc("atSchool", "4"),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_modification_sends_nothing() {
        let handler = handler(MockUserRepository::new(), MockPushProvider::new());
        let doc = student_doc("home", "3");
        handler
            .handle(ChangeEvent::replay(Collection::Students, doc.clone()))
            .await
            .unwrap();
        handler
            .handle(ChangeEvent::new(Collection::Students, ChangeKind::Modified, doc))
            .await
            .unwrap();
    }
}
