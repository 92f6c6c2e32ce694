use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Stdout log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    // OpenTelemetry configuration
    #[serde(default)]
    pub otel_enabled: bool,

    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // HTTP configuration
    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// CORS allowed origins (comma-separated list, "*" for all origins)
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,

    // Document store
    /// JSON fixture loaded into the in-memory store at startup
    #[serde(default)]
    pub seed_path: Option<String>,

    // Push delivery
    /// Send through FCM; when false pushes are only logged
    #[serde(default)]
    pub fcm_enabled: bool,

    #[serde(default)]
    pub fcm_project_id: String,

    /// OAuth2 access token for the FCM HTTP v1 API
    #[serde(default)]
    pub fcm_access_token: String,

    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,

    #[serde(default = "default_fcm_timeout_secs")]
    pub fcm_timeout_secs: u64,

    // Notification queue
    /// Age in hours after which sent/failed queue entries are deleted
    #[serde(default = "default_queue_retention_hours")]
    pub queue_retention_hours: i64,

    #[serde(default = "default_queue_cleanup_interval_secs")]
    pub queue_cleanup_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    // Live tracking
    /// Minimum seconds between durable bus location writes
    #[serde(default = "default_location_persist_interval_secs")]
    pub location_persist_interval_secs: i64,

    /// Time allowed for closers during shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "mybus".to_string()
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_cors_allowed_origins() -> String {
    "*".to_string()
}

fn default_fcm_base_url() -> String {
    common::fcm::DEFAULT_FCM_BASE_URL.to_string()
}

fn default_fcm_timeout_secs() -> u64 {
    10
}

fn default_queue_retention_hours() -> i64 {
    24
}

fn default_queue_cleanup_interval_secs() -> u64 {
    60 * 60
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_location_persist_interval_secs() -> i64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("MYBUS"))
            .build()?
            .try_deserialize()
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::remove_var("MYBUS_LOG_LEVEL");
            std::env::remove_var("MYBUS_HTTP_PORT");
            std::env::remove_var("MYBUS_FCM_ENABLED");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.http_port, 3000);
        assert!(!config.fcm_enabled);
        assert_eq!(config.queue_retention_hours, 24);
        assert_eq!(config.location_persist_interval_secs, 60);
        assert!(config.seed_path.is_none());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("MYBUS_LOG_LEVEL", "debug");
            std::env::set_var("MYBUS_HTTP_PORT", "8080");
            std::env::set_var("MYBUS_FCM_ENABLED", "true");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.http_port, 8080);
        assert!(config.fcm_enabled);

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::remove_var("MYBUS_LOG_LEVEL");
            std::env::remove_var("MYBUS_HTTP_PORT");
            std::env::remove_var("MYBUS_FCM_ENABLED");
        }
    }

    #[test]
    fn test_cors_origins_are_split_and_trimmed() {
        let mut config: ServiceConfig = serde_json::from_str("{}").unwrap();
        config.cors_allowed_origins = "https://a.example, https://b.example,".to_string();
        assert_eq!(
            config.cors_origins(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
