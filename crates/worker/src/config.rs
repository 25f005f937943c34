//! Worker configuration

use std::env;

use linewise_engine::{ConfigError, EngineConfig};

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Schedules (six-field cron, seconds first)
    pub eta_refresh_cron: String,
    pub health_check_cron: String,

    // Alerting
    pub alert_webhook_url: Option<String>,

    // Logging
    pub log_json: bool,

    pub engine: EngineConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|e: std::num::ParseIntError| {
                    ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", e.to_string())
                })?,
            run_migrations: env::var("RUN_MIGRATIONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            eta_refresh_cron: env::var("ETA_REFRESH_CRON")
                .unwrap_or_else(|_| "0 * * * * *".to_string()),
            health_check_cron: env::var("HEALTH_CHECK_CRON")
                .unwrap_or_else(|_| "0 */5 * * * *".to_string()),

            alert_webhook_url: env::var("ALERT_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),

            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            engine: EngineConfig::from_env()?,
        })
    }
}
