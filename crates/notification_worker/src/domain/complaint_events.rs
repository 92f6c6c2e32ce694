use crate::domain::change_handler::ChangeHandler;
use crate::domain::dispatcher::DeliveryDispatcher;
use crate::domain::formatter::{complaint_submitted, complaint_updated, ComplaintUpdate};
use crate::domain::snapshot_differ::SnapshotCache;
use async_trait::async_trait;
use common::domain::{ChangeEvent, ChangeKind, Complaint, DomainResult, UserRepository, UserType};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// New complaints go to active admins; responses and status changes go back
/// to the parent who filed it
pub struct ComplaintEventHandler {
    users: Arc<dyn UserRepository>,
    dispatcher: Arc<DeliveryDispatcher>,
    snapshots: SnapshotCache,
}

fn field<'a>(record: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    record.get(name).and_then(Value::as_str)
}

/// Which update, if any, the parent should hear about. A new response wins
/// over a status change made in the same write.
pub fn classify_update(previous: &Map<String, Value>, complaint: &Complaint) -> Option<ComplaintUpdate> {
    let response = complaint.admin_response.as_deref().filter(|r| !r.is_empty());
    let has_new_response =
        response.is_some() && response != field(previous, "adminResponse");
    let status_changed = complaint.status.as_deref() != field(previous, "status");

    if has_new_response {
        Some(ComplaintUpdate::Responded)
    } else if status_changed {
        Some(ComplaintUpdate::StatusChanged)
    } else {
        None
    }
}

impl ComplaintEventHandler {
    pub fn new(users: Arc<dyn UserRepository>, dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self {
            users,
            dispatcher,
            snapshots: SnapshotCache::new(&["status", "adminResponse"], None),
        }
    }

    #[instrument(skip(self, complaint), fields(complaint_id = %complaint.id))]
    async fn notify_admins(&self, complaint: &Complaint) -> DomainResult<()> {
        let admins = self
            .users
            .list_users_by_type(vec![UserType::Admin], true)
            .await?;
        info!(recipients = admins.len(), "notifying admins of new complaint");

        let notification = complaint_submitted(complaint);
        for admin in &admins {
            self.dispatcher.deliver_to_user(admin, &notification).await;
        }
        Ok(())
    }

    async fn on_modified(&self, event: ChangeEvent) -> DomainResult<()> {
        let id = event.document_id().to_string();
        let Some(diff) = self
            .snapshots
            .observe(&id, event.document.fields.clone())
            .await
        else {
            debug!(complaint_id = %id, "first sighting of complaint, cached");
            return Ok(());
        };

        let complaint = match event.document.decode::<Complaint>() {
            Ok(complaint) => complaint,
            Err(e) => {
                warn!(complaint_id = %id, error = %e, "skipping malformed complaint");
                return Ok(());
            }
        };

        let Some(update) = classify_update(&diff.previous, &complaint) else {
            return Ok(());
        };
        let Some(parent_id) = complaint.parent_id.as_deref() else {
            warn!(complaint_id = %id, "complaint has no parent");
            return Ok(());
        };

        info!(complaint_id = %id, update = ?update, "notifying parent of complaint update");
        self.dispatcher
            .deliver(parent_id, &complaint_updated(&complaint, update))
            .await;
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for ComplaintEventHandler {
    async fn handle(&self, event: ChangeEvent) -> DomainResult<()> {
        match event.kind {
            ChangeKind::Removed => {
                self.snapshots.forget(event.document_id()).await;
                Ok(())
            }
            ChangeKind::Added => {
                self.snapshots
                    .seed(event.document_id(), event.document.fields.clone())
                    .await;
                if !event.is_live_insert() {
                    return Ok(());
                }
                match event.document.decode::<Complaint>() {
                    Ok(complaint) => self.notify_admins(&complaint).await,
                    Err(e) => {
                        warn!(complaint_id = %event.document_id(), error = %e, "skipping malformed complaint");
                        Ok(())
                    }
                }
            }
            ChangeKind::Modified => self.on_modified(event).await,
        }
    }
}
