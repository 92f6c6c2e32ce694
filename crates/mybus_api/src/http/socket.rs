use crate::http::routes::ApiState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::domain::DomainError;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracking_hub::{HubEvent, LiveTrackingService, StartTracking, UpdateLocation};

/// Inbound socket event, `{"event": <name>, "data": <payload>}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "supervisor:startTracking")]
    StartTracking(StartTracking),
    #[serde(rename = "supervisor:updateLocation")]
    UpdateLocation(UpdateLocation),
    #[serde(rename = "supervisor:stopTracking")]
    StopTracking(BusRef),
    #[serde(rename = "parent:subscribeToBus")]
    SubscribeToBus(SubscribeToBus),
    #[serde(rename = "parent:unsubscribeFromBus")]
    UnsubscribeFromBus(BusRef),
    #[serde(rename = "getActiveBuses")]
    GetActiveBuses,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusRef {
    pub bus_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeToBus {
    pub user_id: String,
    pub bus_id: String,
}

impl ClientEvent {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

pub async fn ws_upgrade(State(state): State<ApiState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let tracking = Arc::clone(&state.tracking);
    ws.on_upgrade(move |socket| handle_socket(tracking, socket))
}

async fn handle_socket(tracking: Arc<LiveTrackingService>, mut socket: WebSocket) {
    let (session_id, mut outbound) = tracking.connect().await;
    info!(session_id = %session_id, "socket connected");

    loop {
        tokio::select! {
            maybe_event = outbound.recv() => {
                let Some(event) = maybe_event else {
                    break;
                };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(Ok(message)) = maybe_message else {
                    break;
                };
                match message {
                    Message::Text(raw) => match ClientEvent::parse(raw.as_str()) {
                        Ok(event) => dispatch(&tracking, &session_id, event).await,
                        Err(e) => {
                            debug!(session_id = %session_id, error = %e, "malformed socket frame");
                            tracking
                                .send_error(&session_id, format!("invalid event frame: {e}"))
                                .await;
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    tracking.disconnect(&session_id).await;
    info!(session_id = %session_id, "socket disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &HubEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode socket event");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload.into())).await
}

/// Run one client event against the hub; failures go back to the session as
/// an `error` event
pub async fn dispatch(tracking: &LiveTrackingService, session_id: &str, event: ClientEvent) {
    let result = match event {
        ClientEvent::StartTracking(request) => tracking.start_tracking(session_id, request).await,
        ClientEvent::UpdateLocation(request) => {
            tracking.update_location(session_id, request).await
        }
        ClientEvent::StopTracking(BusRef { bus_id }) => {
            tracking.stop_tracking(session_id, &bus_id).await
        }
        ClientEvent::SubscribeToBus(SubscribeToBus { user_id, bus_id }) => {
            tracking.subscribe(session_id, &user_id, &bus_id).await
        }
        ClientEvent::UnsubscribeFromBus(BusRef { bus_id }) => {
            tracking.unsubscribe(session_id, &bus_id).await;
            Ok(())
        }
        ClientEvent::GetActiveBuses => {
            tracking.active_buses(session_id).await;
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(session_id = %session_id, error = %e, "socket event failed");
        tracking.send_error(session_id, error_message(&e)).await;
    }
}

fn error_message(err: &DomainError) -> String {
    match err {
        DomainError::BusNotFound(_) => "Bus not found".to_string(),
        DomainError::PermissionDenied(reason) => reason.clone(),
        other => other.to_string(),
    }
}
