use crate::http::routes::{router, ApiState};
use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Serve the HTTP and socket routes until `ctx` is cancelled
pub async fn run_http_server(
    config: HttpServerConfig,
    state: ApiState,
    ctx: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;

    info!("Starting HTTP server on {}", addr);

    let app = router(state, &config.cors_origins);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        ctx.cancelled().await;
        info!("HTTP server shutdown signal received");
    });

    match server.await {
        Ok(()) => {
            info!("HTTP server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("HTTP server error: {}", e);
            Err(e.into())
        }
    }
}
