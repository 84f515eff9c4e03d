//! Global application configuration with profile support, following the
//! reference's `BotConfig::{testing,production,aggressive}` pattern.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Process-wide tunables that aren't already covered by per-protocol
/// defaults (§4.4) or the instance catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub alerting: AlertingConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Disables the embedded audit-flush worker (the in-process task that
    /// drains `AuditBuffer` to `INSIGHT_ANALYTICS_ENDPOINT`). Set when no
    /// insight collector is deployed; entries still accumulate in the ring,
    /// they're just never shipped out.
    #[serde(default)]
    pub disable_embedded_worker: bool,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Aggregator tunables (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_reliability_window")]
    pub reliability_window_ticks: usize,
}

fn default_window_secs() -> u64 {
    60
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_reliability_window() -> usize {
    30
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            reliability_window_ticks: default_reliability_window(),
        }
    }
}

impl AggregationConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// AlertEvaluator tunables (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_alert_tick_secs")]
    pub tick_interval_secs: u64,
}

fn default_alert_tick_secs() -> u64 {
    60
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self { tick_interval_secs: default_alert_tick_secs() }
    }
}

impl AlertingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// AuditBuffer tunables (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_batch")]
    pub flush_batch_size: usize,
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_ring_capacity() -> usize {
    10_000
}
fn default_queue_capacity() -> usize {
    5_000
}
fn default_flush_batch() -> usize {
    100
}
fn default_flush_debounce_ms() -> u64 {
    1_000
}
fn default_retention_days() -> i64 {
    30
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            queue_capacity: default_queue_capacity(),
            flush_batch_size: default_flush_batch(),
            flush_debounce_ms: default_flush_debounce_ms(),
            retention_days: default_retention_days(),
        }
    }
}

impl AuditConfig {
    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }
}

/// Outbound HTTP tunables shared by all protocol clients and the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            aggregation: AggregationConfig::default(),
            alerting: AlertingConfig::default(),
            audit: AuditConfig::default(),
            http: HttpConfig::default(),
            disable_embedded_worker: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Fast local-iteration profile: short windows, short retention.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            aggregation: AggregationConfig {
                window_secs: 10,
                tick_interval_secs: 5,
                reliability_window_ticks: 5,
            },
            alerting: AlertingConfig { tick_interval_secs: 5 },
            audit: AuditConfig {
                ring_capacity: 1_000,
                queue_capacity: 500,
                flush_batch_size: 20,
                flush_debounce_ms: 200,
                retention_days: 1,
            },
            http: HttpConfig { timeout_ms: 2_000, retry_attempts: 2 },
            disable_embedded_worker: false,
        }
    }

    /// Steady-state operation profile — matches the §4 defaults directly.
    pub fn production() -> Self {
        Self::default()
    }

    /// Select a profile from the `AGGREGATOR_PROFILE` env var, or a path to
    /// a TOML file if the value isn't a known profile name.
    pub fn from_env() -> Self {
        let profile = std::env::var("AGGREGATOR_PROFILE").unwrap_or_else(|_| "default".to_string());
        let mut config = match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "default" => Self::default(),
            path => Self::from_file(path).unwrap_or_default(),
        };

        if let Ok(raw) = std::env::var("INSIGHT_CONFIG_RELOAD_INTERVAL_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.audit.flush_debounce_ms = ms,
                Err(_) => tracing::warn!(value = %raw, "INSIGHT_CONFIG_RELOAD_INTERVAL_MS is not a valid u64, ignoring"),
            }
        }
        config.disable_embedded_worker = std::env::var("INSIGHT_DISABLE_EMBEDDED_WORKER")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        config
    }

    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "application configuration loaded");
        tracing::info!(
            aggregation_window_secs = self.aggregation.window_secs,
            alert_tick_secs = self.alerting.tick_interval_secs,
            audit_ring_capacity = self.audit.ring_capacity,
            audit_flush_debounce_ms = self.audit.flush_debounce_ms,
            disable_embedded_worker = self.disable_embedded_worker,
            "runtime tunables"
        );
    }
}

static GLOBAL_CONFIG: OnceLock<AppConfig> = OnceLock::new();

pub fn init_config(config: AppConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn config() -> &'static AppConfig {
    GLOBAL_CONFIG.get_or_init(AppConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.aggregation.window_secs, 60);
        assert_eq!(config.audit.ring_capacity, 10_000);
        assert_eq!(config.audit.queue_capacity, 5_000);
    }

    #[test]
    fn testing_profile_shrinks_windows() {
        let config = AppConfig::testing();
        assert_eq!(config.profile, "testing");
        assert!(config.aggregation.window_secs < 60);
        assert!(config.audit.retention_days < 30);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig::testing();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile, "testing");
    }
}
