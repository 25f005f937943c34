//! Engine configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for estimation and optimization passes, loaded from environment variables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on historical aggregate queries before falling back to the SLA
    pub aggregate_timeout: Duration,
    /// Number of most recent closed tickets averaged for service time
    pub history_window: usize,
    /// Tickets at or above this priority count as high priority
    pub high_priority_threshold: i32,
    /// Default cap on transfer suggestions in an optimization report
    pub max_transfer_suggestions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aggregate_timeout: Duration::from_millis(2000),
            history_window: 50,
            high_priority_threshold: 1,
            max_transfer_suggestions: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            aggregate_timeout: Duration::from_millis(parse_var(
                "ENGINE_AGGREGATE_TIMEOUT_MS",
                defaults.aggregate_timeout.as_millis() as u64,
            )?),
            history_window: {
                let window = parse_var("ENGINE_HISTORY_WINDOW", defaults.history_window)?;
                if window == 0 {
                    return Err(ConfigError::Invalid(
                        "ENGINE_HISTORY_WINDOW",
                        "must be at least 1".to_string(),
                    ));
                }
                window
            },
            high_priority_threshold: parse_var(
                "ENGINE_HIGH_PRIORITY_THRESHOLD",
                defaults.high_priority_threshold,
            )?,
            max_transfer_suggestions: parse_var(
                "ENGINE_MAX_TRANSFER_SUGGESTIONS",
                defaults.max_transfer_suggestions,
            )?,
        })
    }
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(name, e.to_string())),
        _ => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
