//! Compile-time per-protocol defaults (§4.4 table), mirroring the
//! reference's `TierConfig`/`ScannerTimingConfig` defaulting pattern: a
//! plain struct plus a lookup function, not a runtime registry.

use crate::types::Protocol;
use std::time::Duration;

/// Default tick interval, batch size, fan-out concurrency, and price-change
/// threshold (as a fraction, e.g. `0.0010` = 0.10%) for one protocol.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolDefaults {
    pub interval_ms: u64,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub price_change_threshold: f64,
}

impl ProtocolDefaults {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub fn defaults_for(protocol: Protocol) -> ProtocolDefaults {
    match protocol {
        Protocol::Chainlink => ProtocolDefaults { interval_ms: 60_000, batch_size: 100, max_concurrency: 5, price_change_threshold: 0.0010 },
        Protocol::Pyth => ProtocolDefaults { interval_ms: 30_000, batch_size: 100, max_concurrency: 5, price_change_threshold: 0.0005 },
        Protocol::Band => ProtocolDefaults { interval_ms: 300_000, batch_size: 50, max_concurrency: 3, price_change_threshold: 0.0020 },
        Protocol::Dia => ProtocolDefaults { interval_ms: 600_000, batch_size: 50, max_concurrency: 3, price_change_threshold: 0.0050 },
        Protocol::Api3 => ProtocolDefaults { interval_ms: 60_000, batch_size: 50, max_concurrency: 5, price_change_threshold: 0.0010 },
        Protocol::Redstone => ProtocolDefaults { interval_ms: 30_000, batch_size: 50, max_concurrency: 5, price_change_threshold: 0.0005 },
        Protocol::Flux => ProtocolDefaults { interval_ms: 30_000, batch_size: 50, max_concurrency: 3, price_change_threshold: 0.0010 },
        Protocol::Switchboard => ProtocolDefaults { interval_ms: 30_000, batch_size: 50, max_concurrency: 3, price_change_threshold: 0.0010 },
    }
}

/// Default staleness threshold: `is_stale ⇔ (now - timestamp) > 300s` unless
/// an instance overrides it.
pub const DEFAULT_STALENESS_THRESHOLD_SECS: u32 = 300;

/// `K` consecutive failures before `SyncState.status` flips to `error`.
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 5;

/// Default data retention window (§4.4).
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chainlink_matches_table() {
        let d = defaults_for(Protocol::Chainlink);
        assert_eq!(d.interval_ms, 60_000);
        assert_eq!(d.batch_size, 100);
        assert_eq!(d.max_concurrency, 5);
        assert!((d.price_change_threshold - 0.0010).abs() < 1e-9);
    }

    #[test]
    fn every_protocol_has_defaults() {
        for p in Protocol::ALL {
            let d = defaults_for(p);
            assert!(d.interval_ms > 0);
            assert!(d.batch_size > 0);
            assert!(d.max_concurrency > 0);
        }
    }
}
