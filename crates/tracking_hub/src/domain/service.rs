use crate::domain::events::{
    Ack, ActiveBusSummary, BusCurrentLocation, BusLocationUpdate, BusTrackingStarted,
    BusTrackingStopped, HubEvent, SubscriptionAck, TrackingStartedAck,
};
use crate::domain::registry::{
    LocationSample, LocationWrite, SessionId, StopWrite, TrackedVehicle, TrackingRegistry,
};
use chrono::{DateTime, Utc};
use common::domain::{
    BusRepository, DomainError, DomainResult, GeoPoint, LocationFix, RiderSummary, StopReason,
    StoredLocation, StudentRepository,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, instrument, warn};

const UNKNOWN_DRIVER: &str = "غير محدد";
const TRACKING_STARTED: &str = "تم بدء التتبع بنجاح";
const TRACKING_STOPPED: &str = "تم إيقاف التتبع";
const SUBSCRIBED: &str = "تم الاشتراك في تتبع الباص";
const BUS_INACTIVE: &str = "الباص غير نشط حالياً";

#[derive(Debug, Clone)]
pub struct LiveTrackingConfig {
    /// Minimum time between durable location writes for one bus
    pub persist_interval: chrono::Duration,
}

impl Default for LiveTrackingConfig {
    fn default() -> Self {
        Self {
            persist_interval: chrono::Duration::seconds(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTracking {
    pub bus_id: String,
    pub supervisor_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocation {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
}

/// Relays bus locations from the supervisor that owns a bus to every parent
/// session subscribed to it.
///
/// Each connected socket is a session with an outbound event channel. All
/// replies and broadcasts go through those channels; the returned
/// `DomainResult` only reports failures the caller should surface as an
/// `error` event.
pub struct LiveTrackingService {
    registry: Arc<TrackingRegistry>,
    buses: Arc<dyn BusRepository>,
    students: Arc<dyn StudentRepository>,
    config: LiveTrackingConfig,
}

impl LiveTrackingService {
    pub fn new(
        registry: Arc<TrackingRegistry>,
        buses: Arc<dyn BusRepository>,
        students: Arc<dyn StudentRepository>,
        config: LiveTrackingConfig,
    ) -> Self {
        Self {
            registry,
            buses,
            students,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TrackingRegistry> {
        &self.registry
    }

    /// Open a session and hand back its id and outbound event stream
    pub async fn connect(&self) -> (SessionId, UnboundedReceiver<HubEvent>) {
        let session_id = xid::new().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register_session(&session_id, tx).await;
        debug!(session_id = %session_id, "session connected");
        (session_id, rx)
    }

    #[instrument(skip(self, request), fields(bus_id = %request.bus_id, supervisor_id = %request.supervisor_id))]
    pub async fn start_tracking(&self, session_id: &str, request: StartTracking) -> DomainResult<()> {
        let bus = self
            .buses
            .get_bus(&request.bus_id)
            .await?
            .ok_or_else(|| DomainError::BusNotFound(request.bus_id.clone()))?;

        let riders: Vec<RiderSummary> = self
            .students
            .list_students_by_bus(&bus.id)
            .await?
            .iter()
            .map(RiderSummary::from)
            .collect();

        let location = GeoPoint::new(request.latitude, request.longitude);
        let now = Utc::now();
        self.buses
            .mark_tracking_started(&bus.id, &request.supervisor_id, location, now)
            .await?;

        let vehicle = TrackedVehicle {
            bus_id: bus.id.clone(),
            session_id: session_id.to_string(),
            supervisor_id: request.supervisor_id.clone(),
            bus_number: bus.display_number().to_string(),
            driver_name: bus
                .driver_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_DRIVER.to_string()),
            location,
            speed: 0.0,
            heading: 0.0,
            last_update: now,
            last_persisted_at: now,
            riders,
        };
        let students_count = vehicle.riders.len();
        let bus_number = vehicle.bus_number.clone();

        if let Some(previous) = self.registry.activate(vehicle).await {
            if previous.session_id != session_id {
                info!(previous_session = %previous.session_id, "tracking taken over by new session");
            }
        }

        info!(students_count, "bus tracking started");

        self.registry
            .send_to(
                session_id,
                HubEvent::TrackingStartedAck(TrackingStartedAck {
                    success: true,
                    bus_id: bus.id.clone(),
                    students_count,
                    message: TRACKING_STARTED.to_string(),
                }),
            )
            .await;

        self.registry
            .broadcast(
                &bus.id,
                HubEvent::TrackingStarted(BusTrackingStarted {
                    bus_id: bus.id.clone(),
                    bus_number,
                    location,
                    timestamp: now.timestamp_millis(),
                }),
            )
            .await;

        Ok(())
    }

    /// Apply a location report. Reports for inactive buses or from a session
    /// that does not own the bus are dropped.
    pub async fn update_location(&self, session_id: &str, request: UpdateLocation) -> DomainResult<()> {
        self.update_location_at(session_id, request, Utc::now()).await
    }

    pub(crate) async fn update_location_at(
        &self,
        session_id: &str,
        request: UpdateLocation,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let sample = LocationSample {
            location: GeoPoint::new(request.latitude, request.longitude),
            speed: request.speed,
            heading: request.heading,
            at,
        };

        let write = self
            .registry
            .update_location(&request.bus_id, session_id, sample, self.config.persist_interval)
            .await;

        let (vehicle, persist) = match write {
            LocationWrite::Inactive => {
                warn!(bus_id = %request.bus_id, session_id = %session_id, "location update for inactive bus dropped");
                return Ok(());
            }
            LocationWrite::NotOwner => {
                warn!(bus_id = %request.bus_id, session_id = %session_id, "location update from non-owning session dropped");
                return Ok(());
            }
            LocationWrite::Accepted { vehicle, persist } => (vehicle, persist),
        };

        let listeners = self
            .registry
            .broadcast(
                &vehicle.bus_id,
                HubEvent::LocationUpdate(BusLocationUpdate {
                    bus_id: vehicle.bus_id.clone(),
                    bus_number: vehicle.bus_number.clone(),
                    location: vehicle.location,
                    speed: request.speed.unwrap_or(0.0),
                    heading: request.heading.unwrap_or(0.0),
                    timestamp: at.timestamp_millis(),
                }),
            )
            .await;
        debug!(bus_id = %vehicle.bus_id, listeners, "location broadcast");

        if persist {
            let fix = LocationFix {
                point: vehicle.location,
                speed: vehicle.speed,
                heading: vehicle.heading,
            };
            match self.buses.record_location(&vehicle.bus_id, fix, at).await {
                Ok(()) => {
                    self.registry
                        .mark_persisted(&vehicle.bus_id, session_id, at)
                        .await;
                }
                Err(e) => error!(
                    bus_id = %vehicle.bus_id,
                    error = %e,
                    "failed to persist bus location, retrying on next update"
                ),
            }
        }

        Ok(())
    }

    #[instrument(skip(self), fields(bus_id = %bus_id))]
    pub async fn stop_tracking(&self, session_id: &str, bus_id: &str) -> DomainResult<()> {
        let vehicle = match self.registry.deactivate(bus_id, session_id).await {
            StopWrite::Inactive => {
                debug!("stop for inactive bus ignored");
                return Ok(());
            }
            StopWrite::NotOwner => {
                return Err(DomainError::PermissionDenied(format!(
                    "session does not own tracking for bus {bus_id}"
                )));
            }
            StopWrite::Stopped(vehicle) => vehicle,
        };

        self.release(&vehicle, StopReason::Stopped).await;

        self.registry
            .send_to(
                session_id,
                HubEvent::TrackingStoppedAck(Ack {
                    success: true,
                    message: TRACKING_STOPPED.to_string(),
                }),
            )
            .await;

        Ok(())
    }

    /// Join the broadcast group of `bus_id` and send the bus's current state
    #[instrument(skip(self), fields(user_id = %user_id, bus_id = %bus_id))]
    pub async fn subscribe(&self, session_id: &str, user_id: &str, bus_id: &str) -> DomainResult<()> {
        if !self
            .students
            .parent_has_student_on_bus(user_id, bus_id)
            .await?
        {
            return Err(DomainError::PermissionDenied(
                "You have no student in this bus".to_string(),
            ));
        }

        let current = self.current_location(bus_id).await?;
        let total = self.registry.subscribe(session_id, user_id, bus_id).await;
        debug!(subscriptions = total, "parent subscribed");

        self.registry
            .send_to(session_id, HubEvent::CurrentLocation(current))
            .await;
        self.registry
            .send_to(
                session_id,
                HubEvent::Subscribed(SubscriptionAck {
                    success: true,
                    bus_id: bus_id.to_string(),
                    message: Some(SUBSCRIBED.to_string()),
                }),
            )
            .await;

        Ok(())
    }

    pub async fn unsubscribe(&self, session_id: &str, bus_id: &str) {
        self.registry.unsubscribe(session_id, bus_id).await;
        self.registry
            .send_to(
                session_id,
                HubEvent::Unsubscribed(SubscriptionAck {
                    success: true,
                    bus_id: bus_id.to_string(),
                    message: None,
                }),
            )
            .await;
    }

    /// Summaries of every active bus, also sent to the requesting session
    pub async fn active_buses(&self, session_id: &str) -> Vec<ActiveBusSummary> {
        let summaries: Vec<ActiveBusSummary> = self
            .registry
            .active_vehicles()
            .await
            .into_iter()
            .map(|v| ActiveBusSummary {
                bus_id: v.bus_id,
                bus_number: v.bus_number,
                location: v.location,
                students_count: v.riders.len(),
                is_tracking: true,
                timestamp: v.last_update.timestamp_millis(),
            })
            .collect();

        self.registry
            .send_to(session_id, HubEvent::ActiveBuses(summaries.clone()))
            .await;
        summaries
    }

    pub async fn send_error(&self, session_id: &str, message: impl Into<String>) {
        self.registry
            .send_to(session_id, HubEvent::error(message))
            .await;
    }

    /// Tear down a closed session: subscriptions go away and every bus it was
    /// tracking is stopped as a disconnect
    #[instrument(skip(self))]
    pub async fn disconnect(&self, session_id: &str) {
        let teardown = self.registry.remove_session(session_id).await;
        if let Some(subscription) = &teardown.subscription {
            debug!(buses = subscription.bus_ids.len(), "subscriptions removed");
        }

        for vehicle in &teardown.owned {
            warn!(bus_id = %vehicle.bus_id, "supervisor disconnected while tracking");
            self.release(vehicle, StopReason::SupervisorDisconnected)
                .await;
        }
    }

    async fn release(&self, vehicle: &TrackedVehicle, reason: StopReason) {
        let now = Utc::now();
        if let Err(e) = self
            .buses
            .mark_tracking_stopped(&vehicle.bus_id, reason, now)
            .await
        {
            error!(bus_id = %vehicle.bus_id, error = %e, "failed to persist tracking stop");
        }

        let reason = match reason {
            StopReason::Stopped => None,
            StopReason::SupervisorDisconnected => Some(reason),
        };
        self.registry
            .broadcast(
                &vehicle.bus_id,
                HubEvent::TrackingStopped(BusTrackingStopped {
                    bus_id: vehicle.bus_id.clone(),
                    bus_number: vehicle.bus_number.clone(),
                    reason,
                    timestamp: now.timestamp_millis(),
                }),
            )
            .await;
        info!(bus_id = %vehicle.bus_id, "bus tracking stopped");
    }

    async fn current_location(&self, bus_id: &str) -> DomainResult<BusCurrentLocation> {
        if let Some(vehicle) = self.registry.vehicle(bus_id).await {
            return Ok(BusCurrentLocation {
                bus_id: vehicle.bus_id,
                bus_number: vehicle.bus_number,
                location: Some(StoredLocation {
                    latitude: vehicle.location.latitude,
                    longitude: vehicle.location.longitude,
                    speed: Some(vehicle.speed),
                    heading: Some(vehicle.heading),
                    timestamp: Some(vehicle.last_update),
                }),
                speed: Some(vehicle.speed),
                heading: Some(vehicle.heading),
                timestamp: Some(vehicle.last_update.timestamp_millis()),
                is_tracking: true,
                message: None,
            });
        }

        let bus = self
            .buses
            .get_bus(bus_id)
            .await?
            .ok_or_else(|| DomainError::BusNotFound(bus_id.to_string()))?;
        let timestamp = bus
            .last_location
            .as_ref()
            .and_then(|l| l.timestamp)
            .map(|t| t.timestamp_millis());

        Ok(BusCurrentLocation {
            bus_id: bus.id.clone(),
            bus_number: bus.display_number().to_string(),
            location: bus.last_location.clone(),
            speed: None,
            heading: None,
            timestamp,
            is_tracking: false,
            message: Some(BUS_INACTIVE.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{Bus, Collection, Document, MockBusRepository, MockStudentRepository};
    use common::memory::InMemoryDocumentStore;
    use serde_json::json;

    async fn seeded_store() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .put(
                Collection::Buses,
                Document::new(
                    "b1",
                    json!({"busNumber": "12", "driverName": "Saad"})
                        .as_object()
                        .cloned()
                        .unwrap(),
                ),
            )
            .await;
        for (id, parent) in [("s1", "p1"), ("s2", "p2")] {
            store
                .put(
                    Collection::Students,
                    Document::new(
                        id,
                        json!({"name": id, "parentId": parent, "busId": "b1"})
                            .as_object()
                            .cloned()
                            .unwrap(),
                    ),
                )
                .await;
        }
        store
    }

    fn service(store: &Arc<InMemoryDocumentStore>) -> LiveTrackingService {
        LiveTrackingService::new(
            Arc::new(TrackingRegistry::new()),
            store.clone(),
            store.clone(),
            LiveTrackingConfig::default(),
        )
    }

    fn start(bus_id: &str) -> StartTracking {
        StartTracking {
            bus_id: bus_id.to_string(),
            supervisor_id: "sup1".to_string(),
            latitude: 24.7,
            longitude: 46.6,
        }
    }

    fn update(latitude: f64) -> UpdateLocation {
        UpdateLocation {
            bus_id: "b1".to_string(),
            latitude,
            longitude: 46.6,
            speed: Some(40.0),
            heading: None,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<HubEvent>) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_tracking_unknown_bus_is_not_found() {
        let store = seeded_store().await;
        let service = service(&store);
        let (session, _rx) = service.connect().await;

        let result = service.start_tracking(&session, start("nope")).await;

        assert!(matches!(result, Err(DomainError::BusNotFound(_))));
        assert!(service.registry().vehicle("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_start_tracking_acks_and_notifies_subscribers() {
        let store = seeded_store().await;
        let service = service(&store);
        let (parent, mut parent_rx) = service.connect().await;
        let (supervisor, mut supervisor_rx) = service.connect().await;
        service.subscribe(&parent, "p1", "b1").await.unwrap();
        drain(&mut parent_rx);

        service.start_tracking(&supervisor, start("b1")).await.unwrap();

        match drain(&mut supervisor_rx).as_slice() {
            [HubEvent::TrackingStartedAck(ack)] => {
                assert!(ack.success);
                assert_eq!(ack.students_count, 2);
            }
            other => panic!("unexpected supervisor events: {other:?}"),
        }
        match drain(&mut parent_rx).as_slice() {
            [HubEvent::TrackingStarted(started)] => assert_eq!(started.bus_number, "12"),
            other => panic!("unexpected parent events: {other:?}"),
        }

        let bus = store.get_bus("b1").await.unwrap().unwrap();
        assert!(bus.is_tracking);
        assert_eq!(bus.current_supervisor_id.as_deref(), Some("sup1"));
    }

    #[tokio::test]
    async fn test_subscribe_requires_a_child_on_the_bus() {
        let store = seeded_store().await;
        let service = service(&store);
        let (session, mut rx) = service.connect().await;

        let result = service.subscribe(&session, "stranger", "b1").await;

        assert!(matches!(result, Err(DomainError::PermissionDenied(_))));
        assert_eq!(service.registry().subscriber_count("b1").await, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_to_inactive_bus_gets_stored_state() {
        let store = seeded_store().await;
        let service = service(&store);
        let (session, mut rx) = service.connect().await;

        service.subscribe(&session, "p1", "b1").await.unwrap();

        let events = drain(&mut rx);
        match events.as_slice() {
            [HubEvent::CurrentLocation(current), HubEvent::Subscribed(ack)] => {
                assert!(!current.is_tracking);
                assert_eq!(current.message.as_deref(), Some(BUS_INACTIVE));
                assert_eq!(ack.bus_id, "b1");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_from_non_owner_is_dropped() {
        let store = seeded_store().await;
        let service = service(&store);
        let (owner, _owner_rx) = service.connect().await;
        let (intruder, _intruder_rx) = service.connect().await;
        let (parent, mut parent_rx) = service.connect().await;
        service.start_tracking(&owner, start("b1")).await.unwrap();
        service.subscribe(&parent, "p1", "b1").await.unwrap();
        drain(&mut parent_rx);

        service.update_location(&intruder, update(1.0)).await.unwrap();

        assert!(drain(&mut parent_rx).is_empty());
        let vehicle = service.registry().vehicle("b1").await.unwrap();
        assert_eq!(vehicle.location, GeoPoint::new(24.7, 46.6));
    }

    #[tokio::test]
    async fn test_stop_from_non_owner_is_forbidden() {
        let store = seeded_store().await;
        let service = service(&store);
        let (owner, _owner_rx) = service.connect().await;
        let (other, _other_rx) = service.connect().await;
        service.start_tracking(&owner, start("b1")).await.unwrap();

        let result = service.stop_tracking(&other, "b1").await;

        assert!(matches!(result, Err(DomainError::PermissionDenied(_))));
        assert!(service.registry().vehicle("b1").await.is_some());
        // stopping a bus nobody tracks is a no-op
        service.stop_tracking(&other, "b2").await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_disconnect_stops_tracking() {
        let store = seeded_store().await;
        let service = service(&store);
        let (supervisor, _sup_rx) = service.connect().await;
        let (parent, mut parent_rx) = service.connect().await;
        service.start_tracking(&supervisor, start("b1")).await.unwrap();
        service.subscribe(&parent, "p1", "b1").await.unwrap();
        drain(&mut parent_rx);

        service.disconnect(&supervisor).await;

        match drain(&mut parent_rx).as_slice() {
            [HubEvent::TrackingStopped(stopped)] => {
                assert_eq!(stopped.reason, Some(StopReason::SupervisorDisconnected));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(service.registry().vehicle("b1").await.is_none());
        let bus = store.get_bus("b1").await.unwrap().unwrap();
        assert!(!bus.is_tracking);
        assert!(bus.disconnected_at.is_some());
    }

    #[tokio::test]
    async fn test_quick_updates_persist_once_per_interval() {
        let mut buses = MockBusRepository::new();
        buses.expect_get_bus().returning(|id| {
            Ok(Some(Bus {
                id: id.to_string(),
                bus_number: Some("12".to_string()),
                driver_name: None,
                is_tracking: false,
                last_location: None,
                current_supervisor_id: None,
                tracking_stopped_at: None,
                disconnected_at: None,
            }))
        });
        buses
            .expect_mark_tracking_started()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        buses
            .expect_record_location()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut students = MockStudentRepository::new();
        students
            .expect_list_students_by_bus()
            .returning(|_| Ok(Vec::new()));

        let service = LiveTrackingService::new(
            Arc::new(TrackingRegistry::new()),
            Arc::new(buses),
            Arc::new(students),
            LiveTrackingConfig::default(),
        );
        let (session, _rx) = service.connect().await;
        service.start_tracking(&session, start("b1")).await.unwrap();

        let now = Utc::now();
        service
            .update_location_at(&session, update(1.0), now + chrono::Duration::seconds(5))
            .await
            .unwrap();
        service
            .update_location_at(&session, update(2.0), now + chrono::Duration::seconds(65))
            .await
            .unwrap();
        service
            .update_location_at(&session, update(3.0), now + chrono::Duration::seconds(70))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_persist_is_retried_on_next_update() {
        let mut buses = MockBusRepository::new();
        buses.expect_get_bus().returning(|id| {
            Ok(Some(Bus {
                id: id.to_string(),
                bus_number: Some("12".to_string()),
                driver_name: None,
                is_tracking: false,
                last_location: None,
                current_supervisor_id: None,
                tracking_stopped_at: None,
                disconnected_at: None,
            }))
        });
        buses
            .expect_mark_tracking_started()
            .returning(|_, _, _, _| Ok(()));
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        buses
            .expect_record_location()
            .times(2)
            .returning(move |bus_id, _, _| {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Err(DomainError::InvalidDocument(
                        bus_id.to_string(),
                        "write rejected".to_string(),
                    ))
                } else {
                    Ok(())
                }
            });

        let mut students = MockStudentRepository::new();
        students
            .expect_list_students_by_bus()
            .returning(|_| Ok(Vec::new()));

        let service = LiveTrackingService::new(
            Arc::new(TrackingRegistry::new()),
            Arc::new(buses),
            Arc::new(students),
            LiveTrackingConfig::default(),
        );
        let (session, _rx) = service.connect().await;
        service.start_tracking(&session, start("b1")).await.unwrap();

        let now = Utc::now();
        for secs in [65, 66, 70] {
            service
                .update_location_at(&session, update(1.0), now + chrono::Duration::seconds(secs))
                .await
                .unwrap();
        }

        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
