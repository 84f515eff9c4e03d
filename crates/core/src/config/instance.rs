//! Resolved instance catalog entries — the output of the loader in
//! `config::loader`, after `${VAR}` expansion and `(protocol, chain)`
//! validation.

use crate::config::defaults::{defaults_for, DEFAULT_STALENESS_THRESHOLD_SECS};
use crate::types::{Chain, Instance, Protocol};
use std::time::Duration;

/// A validated, ready-to-run instance: protocol defaults folded in with any
/// per-instance overrides applied.
#[derive(Debug, Clone)]
pub struct ResolvedInstance {
    pub instance_id: String,
    pub protocol: Protocol,
    pub chain: Chain,
    pub rpc_url: String,
    pub protocol_config: std::collections::HashMap<String, serde_json::Value>,
    pub sync_interval: Duration,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub price_change_threshold: f64,
    pub staleness_threshold_secs: u32,
}

impl ResolvedInstance {
    /// Fold protocol defaults (§4.4) with instance-level overrides.
    pub fn resolve(instance: &Instance) -> Self {
        let d = defaults_for(instance.protocol);
        let sync_interval = instance
            .sync_interval_ms
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or_else(|| d.interval());

        let staleness_threshold_secs = instance
            .protocol_config
            .get("staleness_threshold_secs")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_STALENESS_THRESHOLD_SECS);

        Self {
            instance_id: instance.instance_id.clone(),
            protocol: instance.protocol,
            chain: instance.chain.clone(),
            rpc_url: instance.rpc_url.clone(),
            protocol_config: instance.protocol_config.clone(),
            sync_interval,
            batch_size: d.batch_size,
            max_concurrency: d.max_concurrency,
            price_change_threshold: d.price_change_threshold,
            staleness_threshold_secs,
        }
    }
}

/// Protocol/chain compatibility matrix. On-chain protocols require an EVM
/// (or otherwise contract-capable) chain; HTTP protocols accept any chain
/// since they only scope symbols by the upstream API, not an address.
/// Solana/Near/Aptos/Sui are not EVM-compatible and are rejected for the
/// EVM-only on-chain protocols (§3 invariant: skipped with an audit entry,
/// never a hard failure).
pub fn is_supported_pair(protocol: Protocol, chain: &Chain) -> bool {
    if !chain.is_known() {
        return false;
    }
    if !protocol.is_onchain() {
        return true;
    }
    !matches!(chain, Chain::Solana | Chain::Near | Chain::Aptos | Chain::Sui)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onchain_protocol_rejects_non_evm_chain() {
        assert!(!is_supported_pair(Protocol::Chainlink, &Chain::Solana));
        assert!(is_supported_pair(Protocol::Chainlink, &Chain::Ethereum));
    }

    #[test]
    fn http_protocol_accepts_any_known_chain() {
        assert!(is_supported_pair(Protocol::Pyth, &Chain::Solana));
        assert!(is_supported_pair(Protocol::Dia, &Chain::Ethereum));
    }

    #[test]
    fn unknown_chain_is_never_supported() {
        assert!(!is_supported_pair(Protocol::Pyth, &Chain::Other("madeup".into())));
    }

    #[test]
    fn resolve_applies_protocol_defaults() {
        let instance = Instance {
            instance_id: "ci-eth-main".to_string(),
            protocol: Protocol::Chainlink,
            chain: Chain::Ethereum,
            enabled: true,
            rpc_url: "https://example".to_string(),
            protocol_config: Default::default(),
            sync_interval_ms: None,
        };
        let resolved = ResolvedInstance::resolve(&instance);
        assert_eq!(resolved.batch_size, 100);
        assert_eq!(resolved.max_concurrency, 5);
        assert_eq!(resolved.sync_interval, Duration::from_secs(60));
    }

    #[test]
    fn resolve_honors_instance_interval_override() {
        let instance = Instance {
            instance_id: "ci-eth-main".to_string(),
            protocol: Protocol::Chainlink,
            chain: Chain::Ethereum,
            enabled: true,
            rpc_url: "https://example".to_string(),
            protocol_config: Default::default(),
            sync_interval_ms: Some(15_000),
        };
        let resolved = ResolvedInstance::resolve(&instance);
        assert_eq!(resolved.sync_interval, Duration::from_millis(15_000));
    }
}
