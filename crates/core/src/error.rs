//! Error taxonomy shared by every layer of the aggregation engine.
//!
//! Library crates define `thiserror`-derived enums here and propagate them
//! with `?`; the binary and any cross-cutting glue wrap these in
//! `anyhow::Result` for call-site context.

use crate::types::{Chain, Protocol};
use thiserror::Error;

/// A transient or permanent failure while fetching a price from an upstream.
#[derive(Debug, Error)]
#[error("price fetch failed: protocol={protocol} chain={chain} symbol={symbol}: {cause}")]
pub struct PriceFetchError {
    pub protocol: Protocol,
    pub chain: Chain,
    pub symbol: String,
    pub cause: UpstreamError,
}

/// The two upstream failure shapes this engine's error taxonomy distinguishes.
#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    /// Network timeout, connection reset, 5xx — safe to retry.
    #[error("transient upstream error: {0}")]
    Transient(String),
    /// 4xx, malformed payload, unknown symbol shape — fail fast.
    #[error("permanent upstream error: {0}")]
    Permanent(String),
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }
}

#[derive(Debug, Error)]
#[error("health check failed for {protocol}/{chain}: {reason}")]
pub struct HealthCheckError {
    pub protocol: Protocol,
    pub chain: Chain,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("oracle client error [{code}]: {message}")]
pub struct OracleClientError {
    pub code: String,
    pub message: String,
}

/// Failures raised by the persistence gateway.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transient persistence error: {0}")]
    Transient(String),
    #[error("persistence error: {0}")]
    Other(String),
}

/// Instance configuration that cannot be resolved at read time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported protocol/chain pair: {protocol}/{chain}")]
    UnsupportedPair { protocol: Protocol, chain: Chain },
    #[error("missing rpc_url for instance {instance_id}")]
    MissingRpcUrl { instance_id: String },
    #[error("invalid instance config for {instance_id}: {reason}")]
    Invalid { instance_id: String, reason: String },
}

/// Alert rule parameters that fail validation on load.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("rule {rule_id} has invalid params: {reason}")]
    InvalidParams { rule_id: String, reason: String },
    #[error("rule {rule_id} references an unknown event: {event}")]
    UnknownEvent { rule_id: String, event: String },
}

/// Invariant violations — logged at `critical` and treated as tick failures,
/// never silently swallowed.
#[derive(Debug, Error)]
#[error("internal invariant violated: {0}")]
pub struct InternalError(pub String);
