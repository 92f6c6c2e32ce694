use crate::domain::change_handler::ChangeHandler;
use crate::domain::dispatcher::DeliveryDispatcher;
use crate::domain::formatter::trip_notification;
use async_trait::async_trait;
use common::domain::{ChangeEvent, DomainResult, StudentRepository, Trip};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Notifies the parent when a supervisor records a boarding or arrival
pub struct TripEventHandler {
    students: Arc<dyn StudentRepository>,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl TripEventHandler {
    pub fn new(students: Arc<dyn StudentRepository>, dispatcher: Arc<DeliveryDispatcher>) -> Self {
        Self {
            students,
            dispatcher,
        }
    }

    #[instrument(skip(self, trip), fields(trip_id = %trip.id, action = %trip.action))]
    async fn notify_parent(&self, trip: Trip) -> DomainResult<()> {
        let Some(student_id) = trip.student_id.as_deref() else {
            debug!("trip has no student");
            return Ok(());
        };

        let parent_id = match self.students.get_student(student_id).await? {
            Some(student) => student.parent_id,
            None => None,
        };
        let Some(parent_id) = parent_id else {
            warn!(student_id = %student_id, "no parent for trip student");
            return Ok(());
        };

        self.dispatcher
            .deliver(&parent_id, &trip_notification(&trip))
            .await;
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for TripEventHandler {
    async fn handle(&self, event: ChangeEvent) -> DomainResult<()> {
        if !event.is_live_insert() {
            return Ok(());
        }

        match event.document.decode::<Trip>() {
            Ok(trip) => self.notify_parent(trip).await,
            Err(e) => {
                warn!(trip_id = %event.document_id(), error = %e, "skipping malformed trip");
                Ok(())
            }
        }
    }
}
