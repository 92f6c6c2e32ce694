use crate::domain::events::HubEvent;
use chrono::{DateTime, Utc};
use common::domain::{GeoPoint, RiderSummary};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::debug;

pub type SessionId = String;

/// A bus currently being tracked, owned by exactly one producer session
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedVehicle {
    pub bus_id: String,
    pub session_id: SessionId,
    pub supervisor_id: String,
    pub bus_number: String,
    pub driver_name: String,
    pub location: GeoPoint,
    pub speed: f64,
    pub heading: f64,
    pub last_update: DateTime<Utc>,
    pub last_persisted_at: DateTime<Utc>,
    pub riders: Vec<RiderSummary>,
}

/// One location report from a producer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub location: GeoPoint,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub at: DateTime<Utc>,
}

/// Buses a listener session is subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub session_id: SessionId,
    pub subscriber_id: String,
    pub bus_ids: BTreeSet<String>,
}

/// Result of an ownership-checked location write
#[derive(Debug, Clone, PartialEq)]
pub enum LocationWrite {
    /// No active tracking for the bus
    Inactive,
    /// The session does not own the bus
    NotOwner,
    /// State updated; `persist` is set when the durable copy is due. The
    /// persist clock only moves on `mark_persisted`.
    Accepted {
        vehicle: TrackedVehicle,
        persist: bool,
    },
}

/// Result of an ownership-checked stop
#[derive(Debug, Clone, PartialEq)]
pub enum StopWrite {
    Inactive,
    NotOwner,
    Stopped(TrackedVehicle),
}

/// Everything a disconnecting session held
#[derive(Debug, Default)]
pub struct SessionTeardown {
    pub owned: Vec<TrackedVehicle>,
    pub subscription: Option<SubscriptionRecord>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, UnboundedSender<HubEvent>>,
    vehicles: HashMap<String, TrackedVehicle>,
    subscriptions: HashMap<SessionId, SubscriptionRecord>,
}

impl RegistryState {
    fn send(&self, session_id: &str, event: HubEvent) {
        match self.sessions.get(session_id) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!(session_id = %session_id, "session receiver already closed");
                }
            }
            None => debug!(session_id = %session_id, "event for unknown session dropped"),
        }
    }

    fn broadcast(&self, bus_id: &str, event: &HubEvent) -> usize {
        let mut delivered = 0;
        for record in self.subscriptions.values() {
            if record.bus_ids.contains(bus_id) {
                self.send(&record.session_id, event.clone());
                delivered += 1;
            }
        }
        delivered
    }
}

/// In-process registry of connected sessions, tracked buses and listener
/// subscriptions.
///
/// All mutations are short and synchronous under one lock; callers do their
/// storage I/O before or after, never while holding it.
#[derive(Default)]
pub struct TrackingRegistry {
    state: RwLock<RegistryState>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_session(&self, session_id: &str, sender: UnboundedSender<HubEvent>) {
        self.state
            .write()
            .await
            .sessions
            .insert(session_id.to_string(), sender);
    }

    pub async fn send_to(&self, session_id: &str, event: HubEvent) {
        self.state.read().await.send(session_id, event);
    }

    /// Send `event` to every session subscribed to `bus_id`; returns how many
    /// sessions it was queued for
    pub async fn broadcast(&self, bus_id: &str, event: HubEvent) -> usize {
        self.state.read().await.broadcast(bus_id, &event)
    }

    /// Register `vehicle` as active. An existing entry for the same bus is
    /// replaced, so a new session takes over ownership.
    pub async fn activate(&self, vehicle: TrackedVehicle) -> Option<TrackedVehicle> {
        let mut state = self.state.write().await;
        state.vehicles.insert(vehicle.bus_id.clone(), vehicle)
    }

    pub async fn update_location(
        &self,
        bus_id: &str,
        session_id: &str,
        sample: LocationSample,
        persist_interval: chrono::Duration,
    ) -> LocationWrite {
        let mut state = self.state.write().await;
        let Some(vehicle) = state.vehicles.get_mut(bus_id) else {
            return LocationWrite::Inactive;
        };
        if vehicle.session_id != session_id {
            return LocationWrite::NotOwner;
        }

        vehicle.location = sample.location;
        vehicle.last_update = sample.at;
        if let Some(speed) = sample.speed {
            vehicle.speed = speed;
        }
        if let Some(heading) = sample.heading {
            vehicle.heading = heading;
        }

        let persist = sample.at - vehicle.last_persisted_at >= persist_interval;

        LocationWrite::Accepted {
            vehicle: vehicle.clone(),
            persist,
        }
    }

    /// Record a successful durable write made by the owning session
    pub async fn mark_persisted(&self, bus_id: &str, session_id: &str, at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(vehicle) = state.vehicles.get_mut(bus_id) {
            if vehicle.session_id == session_id && at > vehicle.last_persisted_at {
                vehicle.last_persisted_at = at;
            }
        }
    }

    pub async fn deactivate(&self, bus_id: &str, session_id: &str) -> StopWrite {
        let mut state = self.state.write().await;
        match state.vehicles.get(bus_id) {
            None => StopWrite::Inactive,
            Some(vehicle) if vehicle.session_id != session_id => StopWrite::NotOwner,
            Some(_) => match state.vehicles.remove(bus_id) {
                Some(vehicle) => StopWrite::Stopped(vehicle),
                None => StopWrite::Inactive,
            },
        }
    }

    pub async fn vehicle(&self, bus_id: &str) -> Option<TrackedVehicle> {
        self.state.read().await.vehicles.get(bus_id).cloned()
    }

    pub async fn active_vehicles(&self) -> Vec<TrackedVehicle> {
        let state = self.state.read().await;
        let mut vehicles: Vec<TrackedVehicle> = state.vehicles.values().cloned().collect();
        vehicles.sort_by(|a, b| a.bus_id.cmp(&b.bus_id));
        vehicles
    }

    pub async fn subscribe(&self, session_id: &str, subscriber_id: &str, bus_id: &str) -> usize {
        let mut state = self.state.write().await;
        let record = state
            .subscriptions
            .entry(session_id.to_string())
            .or_insert_with(|| SubscriptionRecord {
                session_id: session_id.to_string(),
                subscriber_id: subscriber_id.to_string(),
                bus_ids: BTreeSet::new(),
            });
        record.bus_ids.insert(bus_id.to_string());
        record.bus_ids.len()
    }

    /// Drop one subscription; the record goes away with its last bus
    pub async fn unsubscribe(&self, session_id: &str, bus_id: &str) {
        let mut state = self.state.write().await;
        let now_empty = match state.subscriptions.get_mut(session_id) {
            Some(record) => {
                record.bus_ids.remove(bus_id);
                record.bus_ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.subscriptions.remove(session_id);
        }
    }

    pub async fn subscription(&self, session_id: &str) -> Option<SubscriptionRecord> {
        self.state.read().await.subscriptions.get(session_id).cloned()
    }

    pub async fn subscriber_count(&self, bus_id: &str) -> usize {
        self.state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|r| r.bus_ids.contains(bus_id))
            .count()
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Forget a session: its sender, its subscriptions, and every bus it owns
    pub async fn remove_session(&self, session_id: &str) -> SessionTeardown {
        let mut state = self.state.write().await;
        state.sessions.remove(session_id);
        let subscription = state.subscriptions.remove(session_id);

        let owned_ids: Vec<String> = state
            .vehicles
            .values()
            .filter(|v| v.session_id == session_id)
            .map(|v| v.bus_id.clone())
            .collect();
        let owned = owned_ids
            .iter()
            .filter_map(|id| state.vehicles.remove(id))
            .collect();

        SessionTeardown {
            owned,
            subscription,
        }
    }
}
