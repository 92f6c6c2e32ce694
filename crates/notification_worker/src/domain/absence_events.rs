use crate::domain::change_handler::ChangeHandler;
use crate::domain::dispatcher::DeliveryDispatcher;
use crate::domain::formatter::{absence_decided, absence_requested};
use crate::domain::snapshot_differ::SnapshotCache;
use async_trait::async_trait;
use common::domain::{Absence, ChangeEvent, ChangeKind, DomainResult, UserRepository, UserType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const PENDING: &str = "pending";

/// New absence requests go to staff; decisions go back to the parent
pub struct AbsenceEventHandler {
    users: Arc<dyn UserRepository>,
    dispatcher: Arc<DeliveryDispatcher>,
    snapshots: SnapshotCache,
}

impl AbsenceEventHandler {
    pub fn new(users: Arc<dyn UserRepository>, dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self {
            users,
            dispatcher,
            snapshots: SnapshotCache::new(&["status"], None),
        }
    }

    #[instrument(skip(self, absence), fields(absence_id = %absence.id))]
    async fn notify_staff(&self, absence: &Absence) -> DomainResult<()> {
        let staff = self
            .users
            .list_users_by_type(vec![UserType::Admin, UserType::Supervisor], false)
            .await?;
        info!(recipients = staff.len(), "notifying staff of absence request");

        let notification = absence_requested(absence);
        for user in &staff {
            self.dispatcher.deliver_to_user(user, &notification).await;
        }
        Ok(())
    }

    #[instrument(skip(self, absence), fields(absence_id = %absence.id, status = %absence.status))]
    async fn notify_parent(&self, absence: &Absence) -> DomainResult<()> {
        let Some(parent_id) = absence.parent_id.as_deref() else {
            warn!("absence has no parent");
            return Ok(());
        };
        self.dispatcher
            .deliver(parent_id, &absence_decided(absence))
            .await;
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for AbsenceEventHandler {
    async fn handle(&self, event: ChangeEvent) -> DomainResult<()> {
        let id = event.document_id().to_string();
        match event.kind {
            ChangeKind::Removed => {
                self.snapshots.forget(&id).await;
                Ok(())
            }
            ChangeKind::Added => {
                self.snapshots.seed(&id, event.document.fields.clone()).await;
                if !event.is_live_insert() {
                    return Ok(());
                }
                match event.document.decode::<Absence>() {
                    Ok(absence) => self.notify_staff(&absence).await,
                    Err(e) => {
                        warn!(absence_id = %id, error = %e, "skipping malformed absence");
                        Ok(())
                    }
                }
            }
            ChangeKind::Modified => {
                let Some(diff) = self
                    .snapshots
                    .observe(&id, event.document.fields.clone())
                    .await
                else {
                    debug!(absence_id = %id, "first sighting of absence, cached");
                    return Ok(());
                };

                let absence = match event.document.decode::<Absence>() {
                    Ok(absence) => absence,
                    Err(e) => {
                        warn!(absence_id = %id, error = %e, "skipping malformed absence");
                        return Ok(());
                    }
                };

                let previous = diff.previous.get("status").and_then(Value::as_str);
                if previous != Some(absence.status.as_str()) && absence.status != PENDING {
                    self.notify_parent(&absence).await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        Collection, DeliveryStats, Document, MockNotificationRepository, MockPushProvider,
        MockUserRepository, NotificationRecord, PushMessage, User,
    };
    use serde_json::json;

    fn user(id: &str, user_type: UserType) -> User {
        User {
            id: id.to_string(),
            name: None,
            email: None,
            user_type,
            is_active: true,
            fcm_token: Some(format!("tok-{id}")),
            last_token_update: None,
            last_logout: None,
        }
    }

    fn absence_doc(status: &str) -> Document {
        let fields = json!({
            "studentId": "s1",
            "studentName": "Ali",
            "parentId": "p1",
            "status": status
        });
        Document::new("a1", fields.as_object().unwrap().clone())
    }

    fn handler(users: MockUserRepository, provider: MockPushProvider) -> AbsenceEventHandler {
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
        let users = Arc::new(users);
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            users.clone(),
            Arc::new(notifications),
            Arc::new(provider),
            Arc::new(DeliveryStats::new()),
        ));
        AbsenceEventHandler::new(users, dispatcher)
    }

    #[tokio::test]
    async fn test_new_request_notifies_admins_and_supervisors() {
        let mut users = MockUserRepository::new();
        users
            .expect_list_users_by_type()
            .withf(|types: &Vec<UserType>, active_only: &bool| {
                types.contains(&UserType::Admin)
                    && types.contains(&UserType::Supervisor)
                    && !*active_only
            })
            .return_once(|_, _| {
                Ok(vec![
                    user("admin", UserType::Admin),
                    user("sup", UserType::Supervisor),
                ])
            });
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .withf(|m: &PushMessage| m.data.get("type").map(String::as_str) == Some("absenceRequested"))
            .times(2)
            .returning(|_| Ok("m".to_string()));

        let handler = handler(users, provider);
        handler
            .handle(ChangeEvent::new(
                Collection::Absences,
                ChangeKind::Added,
                absence_doc("pending"),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_approval_notifies_parent_once() {
        let mut users = MockUserRepository::new();
        users
            .expect_get_user()
            .withf(|id: &str| id == "p1")
            .times(1)
            .returning(|_| Ok(Some(user("p1", UserType::Parent))));
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .withf(|m: &PushMessage| m.data.get("type").map(String::as_str) == Some("absenceApproved"))
            .times(1)
            .returning(|_| Ok("m".to_string()));

        let handler = handler(users, provider);
        handler
            .handle(ChangeEvent::replay(Collection::Absences, absence_doc("pending")))
            .await
            .unwrap();

        let approved = ChangeEvent::new(
            Collection::Absences,
            ChangeKind::Modified,
            absence_doc("approved"),
        );
        handler.handle(approved.clone()).await.unwrap();
        // duplicate delivery of the same change is not a transition
        handler.handle(approved).await.unwrap();
    }

    #[tokio::test]
    async fn test_modification_without_cache_only_seeds() {
        let handler = handler(MockUserRepository::new(), MockPushProvider::new());
        handler
            .handle(ChangeEvent::new(
                Collection::Absences,
                ChangeKind::Modified,
                absence_doc("rejected"),
            ))
            .await
            .unwrap();
    }
}
