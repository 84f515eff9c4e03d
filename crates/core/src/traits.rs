//! Contracts implemented by the protocol clients (`oracle-chain`,
//! `oracle-api`), the persistence layer (`oracle-db`), and the notification
//! transport (`oracle-api`). Keeping these in `oracle-core` means the
//! sync/aggregation/alerting logic here only ever depends on a trait
//! object, never on `alloy`, `sqlx`, or `reqwest` directly.

use crate::error::{ConfigError, HealthCheckError, PersistenceError};
use crate::types::{
    Alert, AlertRule, BatchPriceResult, Capabilities, HealthStatus, Incident, PriceFeed,
    PriceUpdate, SyncState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Uniform contract over a single (protocol, chain) upstream, whether it is
/// read via RPC (on-chain) or REST (HTTP API) — see §4.1.
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Fetch one symbol. Unknown symbols return `Ok(None)`, never an error.
    async fn fetch_price(&self, symbol: &str) -> Result<Option<PriceFeed>, crate::error::UpstreamError>;

    /// Fetch every symbol this client's static ID table knows about,
    /// fanned out through a `ConcurrencyLimiter`. Never raises a
    /// batch-level error; partial failure lives in `BatchPriceResult::failed`.
    async fn get_prices(&self, symbols: &[String]) -> BatchPriceResult;

    async fn health_check(&self) -> Result<HealthStatus, HealthCheckError>;

    fn capabilities(&self) -> Capabilities;

    /// Current block number, or wall-clock seconds as a surrogate for
    /// HTTP-only protocols that have no block concept.
    async fn block_number(&self) -> u64;

    /// Every symbol this client's static mapping table knows how to price.
    fn available_symbols(&self) -> Vec<String>;
}

/// Contract over the two-table persistence protocol (§4.2). Implemented by
/// `oracle-db` against Postgres; stateless from the caller's point of view.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn upsert_feeds(&self, instance_id: &str, feeds: &[PriceFeed]) -> Result<(), PersistenceError>;

    async fn insert_updates(&self, updates: &[PriceUpdate]) -> Result<(), PersistenceError>;

    async fn read_sync_state(&self, instance_id: &str) -> Result<Option<SyncState>, PersistenceError>;

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), PersistenceError>;

    async fn list_feeds(&self, filter: &FeedFilter) -> Result<Vec<PriceFeed>, PersistenceError>;

    async fn query_recent_feeds(&self, symbol: &str, window: chrono::Duration) -> Result<Vec<PriceFeed>, PersistenceError>;

    async fn cleanup_old_data(&self, retention_days: i64) -> Result<u64, PersistenceError>;

    /// Most recent `unified_alerts` row for a debounce fingerprint,
    /// regardless of status — the caller decides coalesce vs. reopen from
    /// its `status` (§4.7, §8 scenario 6).
    async fn find_alert_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Alert>, PersistenceError>;

    /// Upserts by `id`: updating an existing occurrence in place is a
    /// coalesce, writing under a fresh `id` is a reopen (§3, §8 scenario 6).
    async fn save_alert(&self, alert: &Alert) -> Result<(), PersistenceError>;
}

/// Filter accepted by `list_feeds`; all fields are optional ANDs.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    pub protocol: Option<crate::types::Protocol>,
    pub chain: Option<String>,
    pub symbol: Option<String>,
    pub instance_id: Option<String>,
    pub is_stale: Option<bool>,
}

/// Key/value blob store backing `alert_rules/v1` and `incidents/v1`.
/// Single-writer advisory lock, readers never block writers (§5).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError>;
}

/// Outbound notification transport (§6): `POST {channel}` with the alert
/// payload. Non-2xx is a transient error retried by the alert path, not the
/// transport itself.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, channel: crate::types::NotificationChannel, payload: &NotificationPayload) -> Result<(), crate::error::UpstreamError>;
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub alert_id: String,
    pub severity: crate::types::Severity,
    pub title: String,
    pub message: String,
    pub protocol: String,
    pub chain: String,
    pub timestamp: DateTime<Utc>,
}

/// Async batch sink for audit entries, consumed by `AuditBuffer`'s flusher.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist_batch(&self, entries: &[crate::types::AuditEntry]) -> Result<(), crate::error::UpstreamError>;
}

/// Incident blob persistence, layered over `KvStore` at a fixed key.
#[async_trait]
pub trait IncidentBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<Incident>, PersistenceError>;
    async fn save(&self, incidents: &[Incident]) -> Result<(), PersistenceError>;
}

/// Alert rule storage, layered over `KvStore` at `alert_rules/v1`.
#[async_trait]
pub trait RuleBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<AlertRule>, PersistenceError>;
}

/// Instance-skip audit callback used by the catalog loader and orchestrator
/// so a `ConfigError` always produces the matching audit entry (§7).
pub fn config_error_action(err: &ConfigError) -> &'static str {
    match err {
        ConfigError::UnsupportedPair { .. } => "instance.skip.unsupported_pair",
        ConfigError::MissingRpcUrl { .. } => "instance.skip.missing_rpc_url",
        ConfigError::Invalid { .. } => "instance.skip.invalid",
    }
}
