mod config;

use crate::config::ServiceConfig;
use common::domain::{DeliveryStats, PushProvider};
use common::fcm::{DryRunPushProvider, FcmClient, FcmConfig};
use common::memory::{InMemoryDocumentStore, SeedData};
use common::telemetry::{
    init_telemetry, shutdown_telemetry, LogFormat, TelemetryConfig, TelemetryProviders,
};
use mybus_api::{ApiState, HttpServerConfig, MybusApi, TokenService};
use mybus_runner::Runner;
use notification_worker::{NotificationWorker, NotificationWorkerConfig, NotificationWorkerDeps};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracking_hub::{LiveTrackingConfig, LiveTrackingService, TrackingRegistry};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
        log_format: LogFormat::from_name(&config.log_format),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting mybus-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let store = match initialize_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize document store: {:#}", e);
            std::process::exit(1);
        }
    };
    let provider = match build_push_provider(&config) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Failed to initialize push provider: {:#}", e);
            std::process::exit(1);
        }
    };
    let stats = Arc::new(DeliveryStats::new());

    let notification_worker = NotificationWorker::new(
        NotificationWorkerDeps {
            feed: store.clone(),
            users: store.clone(),
            students: store.clone(),
            queue: store.clone(),
            notifications: store.clone(),
            provider,
            stats: stats.clone(),
        },
        NotificationWorkerConfig {
            queue_retention: chrono::Duration::hours(config.queue_retention_hours),
            cleanup_interval: Duration::from_secs(config.queue_cleanup_interval_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
        },
    );

    let tracking = Arc::new(LiveTrackingService::new(
        Arc::new(TrackingRegistry::new()),
        store.clone(),
        store.clone(),
        LiveTrackingConfig {
            persist_interval: chrono::Duration::seconds(config.location_persist_interval_secs),
        },
    ));

    let mybus_api = MybusApi::new(
        ApiState {
            tokens: Arc::new(TokenService::new(store.clone())),
            tracking,
            stats,
        },
        HttpServerConfig {
            host: config.http_host.clone(),
            port: config.http_port,
            cors_origins: config.cors_origins(),
        },
    );

    // Build runner with all processes
    let mut runner = Runner::new().with_named_process("mybus_api", mybus_api.into_runner_process());

    for (name, process) in notification_worker.into_runner_processes() {
        runner = runner.with_boxed_process(name, process);
    }

    runner = runner
        .with_closer(move || {
            Box::pin(async move {
                info!("Running cleanup tasks...");
                // flush pending traces and logs
                shutdown_telemetry(telemetry_providers);
                info!("Cleanup complete");
                Ok(())
            })
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs));

    runner.run().await;
}

async fn initialize_store(config: &ServiceConfig) -> anyhow::Result<Arc<InMemoryDocumentStore>> {
    let store = Arc::new(InMemoryDocumentStore::new());

    match &config.seed_path {
        Some(path) => {
            let seed = SeedData::load(path)?;
            let written = store.apply_seed(seed).await;
            info!(path = %path, documents = written, "document store seeded");
        }
        None => info!("starting with an empty document store"),
    }

    Ok(store)
}

fn build_push_provider(config: &ServiceConfig) -> anyhow::Result<Arc<dyn PushProvider>> {
    if !config.fcm_enabled {
        info!("FCM disabled, push notifications will only be logged");
        return Ok(Arc::new(DryRunPushProvider::new()));
    }

    if config.fcm_project_id.is_empty() || config.fcm_access_token.is_empty() {
        warn!("FCM enabled without project id or access token, falling back to dry run");
        return Ok(Arc::new(DryRunPushProvider::new()));
    }

    info!(project_id = %config.fcm_project_id, "sending push notifications through FCM");
    let client = FcmClient::new(FcmConfig {
        base_url: config.fcm_base_url.clone(),
        project_id: config.fcm_project_id.clone(),
        access_token: config.fcm_access_token.clone(),
        timeout: Duration::from_secs(config.fcm_timeout_secs),
    })?;
    Ok(Arc::new(client))
}
