use crate::domain::{PushError, PushMessage, PushProvider};
use crate::fcm::{ErrorEnvelope, SendRequest, SendResponse};
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_FCM_BASE_URL: &str = "https://fcm.googleapis.com";

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub base_url: String,
    pub project_id: String,
    /// OAuth2 bearer token with the firebase.messaging scope. It is sent as
    /// is and never refreshed, so it must outlive the process.
    pub access_token: String,
    pub timeout: Duration,
}

/// HTTP v1 client for Firebase Cloud Messaging
#[derive(Clone)]
pub struct FcmClient {
    config: FcmConfig,
    client: reqwest::Client,
}

impl FcmClient {
    pub fn new(config: FcmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build FCM HTTP client")?;
        Ok(Self { config, client })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }
}

#[async_trait]
impl PushProvider for FcmClient {
    #[instrument(skip(self, message), fields(title = %message.title))]
    async fn send(&self, message: PushMessage) -> Result<String, PushError> {
        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&self.config.access_token)
            .json(&SendRequest::from_message(&message))
            .send()
            .await
            .map_err(|e| {
                let code = if e.is_timeout() { "timeout" } else { "transport" };
                PushError::with_code(format!("push request failed: {e}"), code)
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PushError::new(format!("failed reading push response: {e}")))?;

        if status.is_success() {
            let sent: SendResponse = serde_json::from_slice(&body)
                .map_err(|e| PushError::new(format!("invalid push response: {e}")))?;
            debug!(name = %sent.name, "push accepted");
            // name is projects/{project}/messages/{id}
            let message_id = sent
                .name
                .rsplit('/')
                .next()
                .unwrap_or(sent.name.as_str())
                .to_string();
            return Ok(message_id);
        }

        match serde_json::from_slice::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .code()
                    .unwrap_or_else(|| status.as_u16().to_string());
                Err(PushError::with_code(envelope.error.message, code))
            }
            Err(_) => Err(PushError::with_code(
                format!(
                    "push rejected ({status}): {}",
                    String::from_utf8_lossy(&body)
                ),
                status.as_u16().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeliveryHints;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn spawn_fcm_server(status: StatusCode, body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/v1/projects/demo/messages:send",
            post(move |headers: HeaderMap| {
                let body = body.clone();
                async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer secret");
                    if authorized {
                        (status, axum::Json(body))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            axum::Json(json!({"error": {"message": "no auth", "status": "UNAUTHENTICATED"}})),
                        )
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        format!("http://{addr}")
    }

    fn client_with_timeout(base_url: String, timeout: Duration) -> FcmClient {
        FcmClient::new(FcmConfig {
            base_url,
            project_id: "demo".to_string(),
            access_token: "secret".to_string(),
            timeout,
        })
        .unwrap()
    }

    fn client(base_url: String) -> FcmClient {
        client_with_timeout(base_url, Duration::from_secs(5))
    }

    fn message() -> PushMessage {
        PushMessage {
            token: "device-token".to_string(),
            title: "title".to_string(),
            body: "body".to_string(),
            data: BTreeMap::new(),
            hints: DeliveryHints::default(),
        }
    }

    #[tokio::test]
    async fn send_returns_trailing_message_id() {
        let base_url = spawn_fcm_server(
            StatusCode::OK,
            json!({"name": "projects/demo/messages/0:1700000000%abc"}),
        )
        .await;

        let id = client(base_url).send(message()).await.unwrap();
        assert_eq!(id, "0:1700000000%abc");
    }

    #[tokio::test]
    async fn send_maps_fcm_error_code() {
        let base_url = spawn_fcm_server(
            StatusCode::NOT_FOUND,
            json!({"error": {
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [{"errorCode": "UNREGISTERED"}]
            }}),
        )
        .await;

        let err = client(base_url).send(message()).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("UNREGISTERED"));
        assert_eq!(err.message, "Requested entity was not found.");
    }

    #[tokio::test]
    async fn send_falls_back_to_http_status_for_unstructured_errors() {
        let base_url = spawn_fcm_server(StatusCode::BAD_GATEWAY, json!("upstream down")).await;

        let err = client(base_url).send(message()).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("502"));
    }

    #[tokio::test]
    async fn send_gives_up_after_configured_timeout() {
        let app = Router::new().route(
            "/v1/projects/demo/messages:send",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::Json(json!({"name": "projects/demo/messages/late"}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let started = std::time::Instant::now();
        let err = client_with_timeout(format!("http://{addr}"), Duration::from_millis(100))
            .send(message())
            .await
            .unwrap_err();

        assert_eq!(err.code.as_deref(), Some("timeout"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
