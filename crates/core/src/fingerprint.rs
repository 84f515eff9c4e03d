//! Deterministic alert fingerprinting used for cooldown/debounce lookups.

use crate::types::AlertEvent;
use std::hash::{Hash, Hasher};

/// `fp(event, protocol, chain, symbol, instance_id)` — stable across process
/// restarts since it only hashes the tuple's serialized form.
pub fn fingerprint(event: AlertEvent, protocol: &str, chain: &str, symbol: &str, instance_id: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{event:?}").hash(&mut hasher);
    protocol.hash(&mut hasher);
    chain.hash(&mut hasher);
    symbol.hash(&mut hasher);
    instance_id.hash(&mut hasher);
    format!("fp-{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        let a = fingerprint(AlertEvent::PriceDeviation, "chainlink", "ethereum", "BTC/USD", "ci-eth-main");
        let b = fingerprint(AlertEvent::PriceDeviation, "chainlink", "ethereum", "BTC/USD", "ci-eth-main");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_on_any_component() {
        let base = fingerprint(AlertEvent::PriceDeviation, "chainlink", "ethereum", "BTC/USD", "ci-eth-main");
        let diff_symbol = fingerprint(AlertEvent::PriceDeviation, "chainlink", "ethereum", "ETH/USD", "ci-eth-main");
        let diff_event = fingerprint(AlertEvent::PriceStale, "chainlink", "ethereum", "BTC/USD", "ci-eth-main");
        assert_ne!(base, diff_symbol);
        assert_ne!(base, diff_event);
    }
}
