use crate::domain::change_handler::ChangeHandler;
use crate::domain::dispatcher::{DeliveryDispatcher, DeliveryOutcome};
use crate::domain::formatter::queue_entry_notification;
use async_trait::async_trait;
use chrono::Utc;
use common::domain::{
    ChangeEvent, ChangeKind, DomainResult, QueueEntry, QueueFailure, QueueRepository, QueueStatus,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const TOKEN_NOT_FOUND: &str = "token not found";

/// Drains client-enqueued notification requests.
///
/// Each pending entry is claimed with a conditional `pending -> processing`
/// write before anything is sent, so a redelivered or concurrent event for the
/// same entry is a no-op.
pub struct QueueWorker {
    queue: Arc<dyn QueueRepository>,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn QueueRepository>, dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self { queue, dispatcher }
    }

    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn process_entry(&self, entry_id: &str) -> DomainResult<()> {
        let Some(entry) = self.queue.claim_pending(entry_id, Utc::now()).await? else {
            debug!("entry not pending, skipping");
            return Ok(());
        };

        let notification = queue_entry_notification(&entry);
        let outcome = self
            .dispatcher
            .deliver(&entry.recipient_id, &notification)
            .await;

        self.record_outcome(&entry, outcome).await
    }

    async fn record_outcome(&self, entry: &QueueEntry, outcome: DeliveryOutcome) -> DomainResult<()> {
        let now = Utc::now();
        match outcome {
            DeliveryOutcome::Sent { message_id } => {
                info!(entry_id = %entry.id, message_id = %message_id, "queue entry sent");
                self.queue.mark_sent(&entry.id, &message_id, now).await
            }
            DeliveryOutcome::Fallback => {
                info!(entry_id = %entry.id, "queue entry recipient has no token");
                self.queue
                    .mark_failed(&entry.id, QueueFailure::new(TOKEN_NOT_FOUND), now)
                    .await
            }
            DeliveryOutcome::Failed { error, code } => {
                warn!(entry_id = %entry.id, error = %error, "queue entry failed");
                self.queue
                    .mark_failed(&entry.id, QueueFailure::new(error).with_code(code), now)
                    .await
            }
        }
    }
}

#[async_trait]
impl ChangeHandler for QueueWorker {
    async fn handle(&self, event: ChangeEvent) -> DomainResult<()> {
        if event.kind == ChangeKind::Removed {
            return Ok(());
        }

        let entry: QueueEntry = match event.document.decode() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(entry_id = %event.document_id(), error = %e, "skipping malformed queue entry");
                return Ok(());
            }
        };

        if entry.status != QueueStatus::Pending {
            return Ok(());
        }

        self.process_entry(&entry.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        Collection, DeliveryStats, Document, MockPushProvider, NotificationRepository, PushError,
        User, UserType,
    };
    use common::memory::InMemoryDocumentStore;

    fn parent(token: Option<&str>) -> User {
        User {
            id: "p1".to_string(),
            name: Some("Mona".to_string()),
            email: None,
            user_type: UserType::Parent,
            is_active: true,
            fcm_token: token.map(str::to_string),
            last_token_update: None,
            last_logout: None,
        }
    }

    async fn setup(
        user: User,
        provider: MockPushProvider,
    ) -> (Arc<InMemoryDocumentStore>, QueueWorker) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .put_record(Collection::Users, &user.id.clone(), &user)
            .await
            .unwrap();
        let entry = QueueEntry::pending("q1", "p1", "Hello", "World", Utc::now());
        store
            .put_record(Collection::NotificationQueue, "q1", &entry)
            .await
            .unwrap();

        let dispatcher = Arc::new(DeliveryDispatcher::new(
            store.clone(),
            store.clone(),
            Arc::new(provider),
            Arc::new(DeliveryStats::new()),
        ));
        let worker = QueueWorker::new(store.clone(), dispatcher);
        (store, worker)
    }

    async fn entry_event(store: &InMemoryDocumentStore) -> ChangeEvent {
        let doc: Document = store
            .get(Collection::NotificationQueue, "q1")
            .await
            .unwrap();
        ChangeEvent::new(Collection::NotificationQueue, ChangeKind::Added, doc)
    }

    #[tokio::test]
    async fn test_pending_entry_is_sent_once() {
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .times(1)
            .returning(|_| Ok("m-1".to_string()));
        let (store, worker) = setup(parent(Some("tok")), provider).await;

        let event = entry_event(&store).await;
        worker.handle(event.clone()).await.unwrap();
        // redelivery of the same event must not send again
        worker.handle(event).await.unwrap();

        let entry = store.get_entry("q1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Sent);
        assert_eq!(entry.message_id.as_deref(), Some("m-1"));
        assert!(entry.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_token_marks_failed() {
        let (store, worker) = setup(parent(None), MockPushProvider::new()).await;

        worker.handle(entry_event(&store).await).await.unwrap();

        let entry = store.get_entry("q1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some(TOKEN_NOT_FOUND));
        assert_eq!(store.list_for_recipient("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_code_is_stored() {
        let mut provider = MockPushProvider::new();
        provider
            .expect_send()
            .returning(|_| Err(PushError::with_code("gone", "UNREGISTERED")));
        let (store, worker) = setup(parent(Some("tok")), provider).await;

        worker.handle(entry_event(&store).await).await.unwrap();

        let entry = store.get_entry("q1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("gone"));
        assert_eq!(entry.error_code.as_deref(), Some("UNREGISTERED"));
    }

    #[tokio::test]
    async fn test_non_pending_and_removed_events_are_ignored() {
        let (store, worker) = setup(parent(Some("tok")), MockPushProvider::new()).await;
        let doc = store
            .get(Collection::NotificationQueue, "q1")
            .await
            .unwrap();

        worker
            .handle(ChangeEvent::new(
                Collection::NotificationQueue,
                ChangeKind::Removed,
                doc.clone(),
            ))
            .await
            .unwrap();

        let mut sent = doc;
        sent.fields
            .insert("status".to_string(), serde_json::json!("sent"));
        worker
            .handle(ChangeEvent::new(
                Collection::NotificationQueue,
                ChangeKind::Modified,
                sent,
            ))
            .await
            .unwrap();

        let entry = store.get_entry("q1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
    }
}
