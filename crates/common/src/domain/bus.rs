use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A location sample reported by a supervisor device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    #[serde(flatten)]
    pub point: GeoPoint,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
}

/// Last durably stored location of a bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    #[serde(default)]
    pub bus_number: Option<String>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub is_tracking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_location: Option<StoredLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_supervisor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Bus {
    /// Bus number shown to parents; falls back to the id
    pub fn display_number(&self) -> &str {
        self.bus_number.as_deref().unwrap_or(&self.id)
    }
}

/// Why a tracking session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stopped,
    SupervisorDisconnected,
}

/// Repository trait for bus records and their tracking state
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BusRepository: Send + Sync {
    async fn get_bus(&self, bus_id: &str) -> DomainResult<Option<Bus>>;

    async fn mark_tracking_started(
        &self,
        bus_id: &str,
        supervisor_id: &str,
        location: GeoPoint,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn record_location(
        &self,
        bus_id: &str,
        fix: LocationFix,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn mark_tracking_stopped(
        &self,
        bus_id: &str,
        reason: StopReason,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;
}
