//! Core domain entities (§3 of the design).
//!
//! These are plain data types shared by every crate in the workspace;
//! persistence and wire-format concerns live in `oracle-db` and the
//! protocol clients, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of oracle protocols this engine knows how to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Chainlink,
    Pyth,
    Band,
    Dia,
    Api3,
    Redstone,
    Flux,
    Switchboard,
}

impl Protocol {
    pub const ALL: [Protocol; 8] = [
        Protocol::Chainlink,
        Protocol::Pyth,
        Protocol::Band,
        Protocol::Dia,
        Protocol::Api3,
        Protocol::Redstone,
        Protocol::Flux,
        Protocol::Switchboard,
    ];

    /// On-chain protocols read a contract via RPC; HTTP protocols hit a REST API.
    pub fn is_onchain(&self) -> bool {
        matches!(
            self,
            Protocol::Chainlink
                | Protocol::Api3
                | Protocol::Redstone
                | Protocol::Flux
                | Protocol::Switchboard
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Chainlink => "chainlink",
            Protocol::Pyth => "pyth",
            Protocol::Band => "band",
            Protocol::Dia => "dia",
            Protocol::Api3 => "api3",
            Protocol::Redstone => "redstone",
            Protocol::Flux => "flux",
            Protocol::Switchboard => "switchboard",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chainlink" => Ok(Protocol::Chainlink),
            "pyth" => Ok(Protocol::Pyth),
            "band" => Ok(Protocol::Band),
            "dia" => Ok(Protocol::Dia),
            "api3" => Ok(Protocol::Api3),
            "redstone" => Ok(Protocol::Redstone),
            "flux" => Ok(Protocol::Flux),
            "switchboard" => Ok(Protocol::Switchboard),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// The fixed chain set from §6. Unknown strings still round-trip (`Other`)
/// so an instance referencing a not-yet-enumerated chain can be rejected by
/// name at validation time rather than panicking at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Bsc,
    Avalanche,
    Fantom,
    Celo,
    Gnosis,
    Linea,
    Scroll,
    Mantle,
    Mode,
    Blast,
    Solana,
    Near,
    Aptos,
    Sui,
    Moonbeam,
    Sepolia,
    PolygonAmoy,
    Goerli,
    Mumbai,
    Local,
    Other(String),
}

impl Chain {
    pub const KNOWN: &'static [&'static str] = &[
        "ethereum",
        "polygon",
        "arbitrum",
        "optimism",
        "base",
        "bsc",
        "avalanche",
        "fantom",
        "celo",
        "gnosis",
        "linea",
        "scroll",
        "mantle",
        "mode",
        "blast",
        "solana",
        "near",
        "aptos",
        "sui",
        "moonbeam",
        "sepolia",
        "polygonAmoy",
        "goerli",
        "mumbai",
        "local",
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Base => "base",
            Chain::Bsc => "bsc",
            Chain::Avalanche => "avalanche",
            Chain::Fantom => "fantom",
            Chain::Celo => "celo",
            Chain::Gnosis => "gnosis",
            Chain::Linea => "linea",
            Chain::Scroll => "scroll",
            Chain::Mantle => "mantle",
            Chain::Mode => "mode",
            Chain::Blast => "blast",
            Chain::Solana => "solana",
            Chain::Near => "near",
            Chain::Aptos => "aptos",
            Chain::Sui => "sui",
            Chain::Moonbeam => "moonbeam",
            Chain::Sepolia => "sepolia",
            Chain::PolygonAmoy => "polygonAmoy",
            Chain::Goerli => "goerli",
            Chain::Mumbai => "mumbai",
            Chain::Local => "local",
            Chain::Other(s) => s,
        }
    }

    /// The Chain set is "fixed" per §6 but we never hard-fail on an unknown
    /// string here; `Other` lets the instance loader reject it by name with
    /// a `ConfigError` instead of this parse step panicking.
    pub fn is_known(&self) -> bool {
        !matches!(self, Chain::Other(_))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Chain {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ethereum" => Chain::Ethereum,
            "polygon" => Chain::Polygon,
            "arbitrum" => Chain::Arbitrum,
            "optimism" => Chain::Optimism,
            "base" => Chain::Base,
            "bsc" => Chain::Bsc,
            "avalanche" => Chain::Avalanche,
            "fantom" => Chain::Fantom,
            "celo" => Chain::Celo,
            "gnosis" => Chain::Gnosis,
            "linea" => Chain::Linea,
            "scroll" => Chain::Scroll,
            "mantle" => Chain::Mantle,
            "mode" => Chain::Mode,
            "blast" => Chain::Blast,
            "solana" => Chain::Solana,
            "near" => Chain::Near,
            "aptos" => Chain::Aptos,
            "sui" => Chain::Sui,
            "moonbeam" => Chain::Moonbeam,
            "sepolia" => Chain::Sepolia,
            "polygonAmoy" => Chain::PolygonAmoy,
            "goerli" => Chain::Goerli,
            "mumbai" => Chain::Mumbai,
            "local" => Chain::Local,
            other => Chain::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for Chain {
    type Error = std::convert::Infallible;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Chain> for String {
    fn from(value: Chain) -> Self {
        value.as_str().to_string()
    }
}

/// A configured (protocol, chain) polling endpoint, as read from the
/// instance catalog. The core only ever reads these; mutation is external.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub protocol: Protocol,
    pub chain: Chain,
    pub enabled: bool,
    pub rpc_url: String,
    #[serde(default)]
    pub protocol_config: HashMap<String, serde_json::Value>,
    pub sync_interval_ms: Option<u32>,
}

/// A single price sample from one protocol, on one chain, for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeed {
    pub feed_id: String,
    pub instance_id: String,
    pub protocol: Protocol,
    pub chain: Chain,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price: f64,
    pub price_raw: String,
    pub decimals: u8,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub confidence: Option<f64>,
    pub sources: Option<Vec<String>>,
    pub is_stale: bool,
    pub staleness_seconds: u32,
    pub tx_hash: Option<String>,
    pub log_index: Option<i32>,
}

impl PriceFeed {
    /// Deterministic fingerprint of `(protocol, chain, symbol, timestamp)`.
    pub fn compute_feed_id(protocol: Protocol, chain: &Chain, symbol: &str, timestamp: DateTime<Utc>) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        protocol.as_str().hash(&mut hasher);
        chain.as_str().hash(&mut hasher);
        symbol.hash(&mut hasher);
        timestamp.timestamp_millis().hash(&mut hasher);
        format!("feed-{:016x}", hasher.finish())
    }

    /// Recompute `is_stale`/`staleness_seconds` against `now` and the
    /// per-instance threshold (default 300s, §3 invariant).
    pub fn refresh_staleness(&mut self, now: DateTime<Utc>, threshold_seconds: u32) {
        let staleness = (now - self.timestamp).num_seconds().max(0) as u32;
        self.staleness_seconds = staleness;
        self.is_stale = staleness > threshold_seconds;
    }
}

/// A price-change event derived from two consecutive feed samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub id: String,
    pub feed_id: String,
    pub instance_id: String,
    pub protocol: Protocol,
    pub previous_price: f64,
    pub current_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
}

impl PriceUpdate {
    pub fn id_for(feed_id: &str) -> String {
        format!("update-{feed_id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Healthy,
    Lagging,
    Stalled,
    Error,
}

/// One row per instance tracking the health of its sync loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub instance_id: String,
    pub protocol: Protocol,
    pub chain: Chain,
    pub last_processed_block: u64,
    pub status: SyncStatus,
    pub consecutive_failures: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_duration_ms: Option<u32>,
    pub avg_sync_duration_ms: Option<u32>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(instance_id: impl Into<String>, protocol: Protocol, chain: Chain) -> Self {
        Self {
            instance_id: instance_id.into(),
            protocol,
            chain,
            last_processed_block: 0,
            status: SyncStatus::Healthy,
            consecutive_failures: 0,
            last_sync_at: None,
            last_sync_duration_ms: None,
            avg_sync_duration_ms: None,
            last_error: None,
            last_error_at: None,
        }
    }
}

/// The closed set of alert-rule events from §6. Events referencing upstream
/// subsystems outside this core (disputes, votes) are parsed and stored but
/// never fire — see `AlertEvaluator`'s dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    DisputeCreated,
    LivenessExpiring,
    SyncError,
    StaleSync,
    ContractPaused,
    SyncBacklog,
    BacklogAssertions,
    BacklogDisputes,
    MarketStale,
    ExecutionDelayed,
    LowParticipation,
    HighVoteDivergence,
    HighDisputeRate,
    SlowApiRequest,
    HighErrorRate,
    DatabaseSlowQuery,
    PriceDeviation,
    LowGas,
    PriceStale,
}

impl AlertEvent {
    /// Events this core can actually evaluate; the rest belong to upstream
    /// subsystems (disputes, voting) and are stored-only (§9 open question).
    pub fn is_evaluated_here(&self) -> bool {
        matches!(
            self,
            AlertEvent::SyncError
                | AlertEvent::StaleSync
                | AlertEvent::SyncBacklog
                | AlertEvent::HighErrorRate
                | AlertEvent::PriceDeviation
                | AlertEvent::PriceStale
                | AlertEvent::LowGas
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertEvent::DisputeCreated => "dispute_created",
            AlertEvent::LivenessExpiring => "liveness_expiring",
            AlertEvent::SyncError => "sync_error",
            AlertEvent::StaleSync => "stale_sync",
            AlertEvent::ContractPaused => "contract_paused",
            AlertEvent::SyncBacklog => "sync_backlog",
            AlertEvent::BacklogAssertions => "backlog_assertions",
            AlertEvent::BacklogDisputes => "backlog_disputes",
            AlertEvent::MarketStale => "market_stale",
            AlertEvent::ExecutionDelayed => "execution_delayed",
            AlertEvent::LowParticipation => "low_participation",
            AlertEvent::HighVoteDivergence => "high_vote_divergence",
            AlertEvent::HighDisputeRate => "high_dispute_rate",
            AlertEvent::SlowApiRequest => "slow_api_request",
            AlertEvent::HighErrorRate => "high_error_rate",
            AlertEvent::DatabaseSlowQuery => "database_slow_query",
            AlertEvent::PriceDeviation => "price_deviation",
            AlertEvent::LowGas => "low_gas",
            AlertEvent::PriceStale => "price_stale",
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dispute_created" => Ok(AlertEvent::DisputeCreated),
            "liveness_expiring" => Ok(AlertEvent::LivenessExpiring),
            "sync_error" => Ok(AlertEvent::SyncError),
            "stale_sync" => Ok(AlertEvent::StaleSync),
            "contract_paused" => Ok(AlertEvent::ContractPaused),
            "sync_backlog" => Ok(AlertEvent::SyncBacklog),
            "backlog_assertions" => Ok(AlertEvent::BacklogAssertions),
            "backlog_disputes" => Ok(AlertEvent::BacklogDisputes),
            "market_stale" => Ok(AlertEvent::MarketStale),
            "execution_delayed" => Ok(AlertEvent::ExecutionDelayed),
            "low_participation" => Ok(AlertEvent::LowParticipation),
            "high_vote_divergence" => Ok(AlertEvent::HighVoteDivergence),
            "high_dispute_rate" => Ok(AlertEvent::HighDisputeRate),
            "slow_api_request" => Ok(AlertEvent::SlowApiRequest),
            "high_error_rate" => Ok(AlertEvent::HighErrorRate),
            "database_slow_query" => Ok(AlertEvent::DatabaseSlowQuery),
            "price_deviation" => Ok(AlertEvent::PriceDeviation),
            "low_gas" => Ok(AlertEvent::LowGas),
            "price_stale" => Ok(AlertEvent::PriceStale),
            other => Err(format!("unknown alert event: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Webhook,
    Email,
    Telegram,
    Slack,
    Pagerduty,
}

/// A stored alert-rule definition (`alert_rules/v1` blob).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub event: AlertEvent,
    pub severity: Severity,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    pub cooldown_minutes: u32,
    pub max_notifications_per_hour: u32,
    pub silenced_until: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn matches_scope(&self, protocol: Protocol, chain: &str, instance_id: &str, symbol: &str) -> bool {
        (self.protocols.is_empty() || self.protocols.contains(&protocol))
            && (self.chains.is_empty() || self.chains.iter().any(|c| c == chain))
            && (self.instances.is_empty() || self.instances.iter().any(|i| i == instance_id))
            && (self.symbols.is_empty() || self.symbols.iter().any(|s| s == symbol))
    }

    pub fn is_silenced(&self, now: DateTime<Utc>) -> bool {
        self.silenced_until.map(|t| now < t).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

/// A generated alert. Identity is `id`; debounce identity is the fingerprint
/// of `(event, protocol, chain, symbol, instance_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub fingerprint: String,
    pub event: AlertEvent,
    pub severity: Severity,
    pub protocol: Protocol,
    pub chain: String,
    pub instance_id: String,
    pub symbol: String,
    pub title: String,
    pub message: String,
    pub context: HashMap<String, serde_json::Value>,
    pub status: AlertStatus,
    pub occurrences: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    User,
    Admin,
    System,
    Anonymous,
}

/// A single entry in the audit log. Created by any component, held in the
/// ring buffer, flushed asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub actor_type: ActorType,
    pub action: String,
    pub severity: Severity,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Open,
    Mitigating,
    Resolved,
}

/// A cross-alert grouping, persisted as a single versioned blob
/// (`incidents/v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: u32,
    pub title: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub owner: Option<String>,
    pub root_cause: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub alert_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Health status reported by a single `OracleClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: SyncStatus,
    pub latency_ms: u64,
    pub issues: Vec<String>,
}

/// Static per-protocol feature flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capabilities {
    pub price_feeds: bool,
    pub batch_queries: bool,
    pub websocket: bool,
}

/// Result of one batched fetch: successes, per-symbol failures, and timing.
/// Never raised as a batch-level error — partial failure is a normal result.
#[derive(Debug, Clone, Default)]
pub struct BatchPriceResult {
    pub prices: Vec<PriceFeed>,
    pub failed: Vec<FailedSymbol>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FailedSymbol {
    pub symbol: String,
    pub error: String,
}
