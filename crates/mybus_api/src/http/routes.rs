use crate::domain::{LogoutRequest, TokenService, UpdateTokenRequest};
use crate::http::error::{ApiError, ApiMessage};
use crate::http::socket::ws_upgrade;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use common::domain::{DeliveryCounts, DeliveryStats};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use tracking_hub::LiveTrackingService;

#[derive(Clone)]
pub struct ApiState {
    pub tokens: Arc<TokenService>,
    pub tracking: Arc<LiveTrackingService>,
    pub stats: Arc<DeliveryStats>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub notifications: DeliveryCounts,
}

pub fn router(state: ApiState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/logout", post(logout))
        .route("/api/updateToken", post(update_token))
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// `*` or an empty list allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

async fn logout(
    State(state): State<ApiState>,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<ApiMessage>, ApiError> {
    let Json(request) = payload?;
    state.tokens.logout(request).await?;
    Ok(Json(ApiMessage::ok("FCM Token deleted successfully")))
}

async fn update_token(
    State(state): State<ApiState>,
    payload: Result<Json<UpdateTokenRequest>, JsonRejection>,
) -> Result<Json<ApiMessage>, ApiError> {
    let Json(request) = payload?;
    state.tokens.update_token(request).await?;
    Ok(Json(ApiMessage::ok("FCM Token updated successfully")))
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        notifications: state.stats.snapshot(),
    })
}
