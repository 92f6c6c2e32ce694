use common::domain::{GeoPoint, StoredLocation, StopReason};
use serde::Serialize;

/// Outbound socket event. Serialized as `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum HubEvent {
    #[serde(rename = "supervisor:trackingStarted")]
    TrackingStartedAck(TrackingStartedAck),
    #[serde(rename = "supervisor:trackingStopped")]
    TrackingStoppedAck(Ack),
    #[serde(rename = "bus:trackingStarted")]
    TrackingStarted(BusTrackingStarted),
    #[serde(rename = "bus:locationUpdate")]
    LocationUpdate(BusLocationUpdate),
    #[serde(rename = "bus:trackingStopped")]
    TrackingStopped(BusTrackingStopped),
    #[serde(rename = "bus:currentLocation")]
    CurrentLocation(BusCurrentLocation),
    #[serde(rename = "parent:subscribed")]
    Subscribed(SubscriptionAck),
    #[serde(rename = "parent:unsubscribed")]
    Unsubscribed(SubscriptionAck),
    #[serde(rename = "activeBuses")]
    ActiveBuses(Vec<ActiveBusSummary>),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl HubEvent {
    pub fn error(message: impl Into<String>) -> Self {
        HubEvent::Error(ErrorMessage {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::TrackingStartedAck(_) => "supervisor:trackingStarted",
            HubEvent::TrackingStoppedAck(_) => "supervisor:trackingStopped",
            HubEvent::TrackingStarted(_) => "bus:trackingStarted",
            HubEvent::LocationUpdate(_) => "bus:locationUpdate",
            HubEvent::TrackingStopped(_) => "bus:trackingStopped",
            HubEvent::CurrentLocation(_) => "bus:currentLocation",
            HubEvent::Subscribed(_) => "parent:subscribed",
            HubEvent::Unsubscribed(_) => "parent:unsubscribed",
            HubEvent::ActiveBuses(_) => "activeBuses",
            HubEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStartedAck {
    pub success: bool,
    pub bus_id: String,
    pub students_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusTrackingStarted {
    pub bus_id: String,
    pub bus_number: String,
    pub location: GeoPoint,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusLocationUpdate {
    pub bus_id: String,
    pub bus_number: String,
    pub location: GeoPoint,
    pub speed: f64,
    pub heading: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusTrackingStopped {
    pub bus_id: String,
    pub bus_number: String,
    /// Absent for an explicit stop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
    pub timestamp: i64,
}

/// Current state sent to a new subscriber: live state for an active bus,
/// otherwise the last durably stored location
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusCurrentLocation {
    pub bus_id: String,
    pub bus_number: String,
    pub location: Option<StoredLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub is_tracking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAck {
    pub success: bool,
    pub bus_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBusSummary {
    pub bus_id: String,
    pub bus_number: String,
    pub location: GeoPoint,
    pub students_count: usize,
    pub is_tracking: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}
