//! Per-(protocol, chain, instance) polling loop (C4, §4.4).
//!
//! One `SyncInstance` owns exactly one `OracleClient` handle, one ticker,
//! and one `symbol -> last_price` cache. Ticks never overlap: the loop body
//! awaits the previous tick to completion before the next `ticker.tick()`
//! resolves, and `tokio::time::interval`'s default burst behavior means an
//! overrunning tick is followed immediately by the next one rather than
//! skipping a slot.

use crate::audit::AuditBuffer;
use crate::config::defaults::CONSECUTIVE_FAILURE_THRESHOLD;
use crate::config::instance::ResolvedInstance;
use crate::error::PersistenceError;
use crate::fingerprint;
use crate::symbol;
use crate::traits::{OracleClient, PersistenceGateway};
use crate::types::{
    ActorType, AuditEntry, PriceFeed, PriceUpdate, Severity, SyncState, SyncStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

/// Owns the per-instance `symbol -> last_price` cache (§3 Ownership).
/// Never mutated from outside the owning `SyncInstance`'s task.
#[derive(Default)]
struct LastPriceCache {
    prices: DashMap<String, f64>,
}

impl LastPriceCache {
    fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).map(|v| *v)
    }

    fn set(&self, symbol: &str, price: f64) {
        self.prices.insert(symbol.to_string(), price);
    }
}

/// One tick's summary, used for the structured log line and tests.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub ok: bool,
    pub fetched: usize,
    pub failed: usize,
    pub updates_emitted: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// A single (protocol, chain, instance) polling loop, per §4.4.
pub struct SyncInstance {
    instance: ResolvedInstance,
    client: Arc<dyn OracleClient>,
    gateway: Arc<dyn PersistenceGateway>,
    audit: Arc<AuditBuffer>,
    last_prices: LastPriceCache,
    consecutive_failures: AtomicU32,
    shutdown: Arc<Notify>,
}

impl SyncInstance {
    pub fn new(
        instance: ResolvedInstance,
        client: Arc<dyn OracleClient>,
        gateway: Arc<dyn PersistenceGateway>,
        audit: Arc<AuditBuffer>,
    ) -> Self {
        Self {
            instance,
            client,
            gateway,
            audit,
            last_prices: LastPriceCache::default(),
            consecutive_failures: AtomicU32::new(0),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance.instance_id
    }

    /// Signal the running loop to stop after its current tick.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// `[created] -> [initial_fetch] -> [ticking]` state machine (§4.4).
    /// Ticks are strictly sequential: the loop body fully awaits one tick
    /// before `ticker.tick()` can resolve again.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.instance.sync_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.notified() => {
                    info!(instance_id = %self.instance_id(), "sync instance stopping");
                    return;
                }
            }
            let outcome = self.tick().await;
            info!(
                instance_id = %self.instance_id(),
                protocol = %self.instance.protocol,
                ok = outcome.ok,
                fetched = outcome.fetched,
                failed = outcome.failed,
                updates_emitted = outcome.updates_emitted,
                duration_ms = outcome.duration_ms,
                "sync tick complete"
            );
        }
    }

    /// The normative tick algorithm (§4.4 steps 1-9). Returns a summary for
    /// logging/tests rather than a `Result` — tick-level failures never
    /// propagate past this call (§7).
    #[instrument(skip(self), fields(instance_id = %self.instance_id()))]
    pub async fn tick(&self) -> TickOutcome {
        let started_at = Instant::now();
        let tick_started_at = Utc::now();

        let block_number = self.client.block_number().await;
        let symbols = self.client.available_symbols();

        let batch = self.client.get_prices(&symbols).await;

        for failed in &batch.failed {
            self.audit.log(AuditEntry {
                id: crate::audit::generate_audit_id(),
                timestamp: Utc::now(),
                actor: self.instance_id().to_string(),
                actor_type: ActorType::System,
                action: "sync.symbol.fetch_failed".to_string(),
                severity: Severity::Warning,
                entity_type: Some("symbol".to_string()),
                entity_id: Some(failed.symbol.clone()),
                details: Default::default(),
                success: false,
                error_message: Some(failed.error.clone()),
            });
        }

        let feeds = batch.prices;

        let persisted = self.gateway.upsert_feeds(self.instance_id(), &feeds).await;
        if let Err(err) = persisted {
            return self.record_failure(tick_started_at, started_at, err).await;
        }

        let mut updates = Vec::new();
        for feed in &feeds {
            if let Some(previous) = self.last_prices.get(&feed.symbol) {
                if previous != 0.0 {
                    let relative_change = (feed.price - previous).abs() / previous.abs();
                    if relative_change >= self.instance.price_change_threshold {
                        updates.push(PriceUpdate {
                            id: PriceUpdate::id_for(&feed.feed_id),
                            feed_id: feed.feed_id.clone(),
                            instance_id: self.instance_id().to_string(),
                            protocol: feed.protocol,
                            previous_price: previous,
                            current_price: feed.price,
                            price_change: feed.price - previous,
                            price_change_percent: relative_change * 100.0,
                            timestamp: feed.timestamp,
                            block_number: feed.block_number,
                        });
                    }
                }
            }
        }

        if !updates.is_empty() {
            if let Err(err) = self.gateway.insert_updates(&updates).await {
                return self.record_failure(tick_started_at, started_at, err).await;
            }
        }

        for feed in &feeds {
            self.last_prices.set(&feed.symbol, feed.price);
        }

        self.consecutive_failures.store(0, Ordering::SeqCst);
        let duration_ms = started_at.elapsed().as_millis() as u32;
        let state = SyncState {
            instance_id: self.instance_id().to_string(),
            protocol: self.instance.protocol,
            chain: self.instance.chain.clone(),
            last_processed_block: block_number,
            status: SyncStatus::Healthy,
            consecutive_failures: 0,
            last_sync_at: Some(tick_started_at),
            last_sync_duration_ms: Some(duration_ms),
            avg_sync_duration_ms: None,
            last_error: None,
            last_error_at: None,
        };
        if let Err(err) = self.gateway.upsert_sync_state(&state).await {
            warn!(instance_id = %self.instance_id(), error = %err, "failed to persist healthy sync state");
        }

        TickOutcome {
            ok: true,
            fetched: feeds.len(),
            failed: batch.failed.len(),
            updates_emitted: updates.len(),
            duration_ms: started_at.elapsed().as_millis() as u64,
            error: None,
        }
    }

    /// Tick-level failure path (§4.4, §7): bump `consecutive_failures`,
    /// flip to `error` at `K = 5`, never reset the last-price cache.
    async fn record_failure(
        &self,
        tick_started_at: chrono::DateTime<Utc>,
        started_at: Instant,
        err: PersistenceError,
    ) -> TickOutcome {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let status = if failures >= CONSECUTIVE_FAILURE_THRESHOLD {
            SyncStatus::Error
        } else {
            SyncStatus::Lagging
        };

        self.audit.log(AuditEntry {
            id: crate::audit::generate_audit_id(),
            timestamp: Utc::now(),
            actor: self.instance_id().to_string(),
            actor_type: ActorType::System,
            action: "sync.tick.failed".to_string(),
            severity: Severity::Critical,
            entity_type: Some("instance".to_string()),
            entity_id: Some(self.instance_id().to_string()),
            details: Default::default(),
            success: false,
            error_message: Some(err.to_string()),
        });

        let state = SyncState {
            instance_id: self.instance_id().to_string(),
            protocol: self.instance.protocol,
            chain: self.instance.chain.clone(),
            last_processed_block: 0,
            status,
            consecutive_failures: failures,
            last_sync_at: Some(tick_started_at),
            last_sync_duration_ms: Some(started_at.elapsed().as_millis() as u32),
            avg_sync_duration_ms: None,
            last_error: Some(err.to_string()),
            last_error_at: Some(Utc::now()),
        };
        // Best-effort: the gateway itself just failed, so this write may
        // fail too. We still attempt it once; persistent state loss is
        // surfaced next tick via the unchanged `consecutive_failures` count.
        let _ = self.gateway.upsert_sync_state(&state).await;

        TickOutcome {
            ok: false,
            fetched: 0,
            failed: 0,
            updates_emitted: 0,
            duration_ms: started_at.elapsed().as_millis() as u64,
            error: Some(err.to_string()),
        }
    }
}

/// Deterministic alert fingerprint helper re-exported for convenience at
/// the sync/alert boundary (both need the same tuple shape).
pub fn sync_fingerprint(instance: &ResolvedInstance, symbol: &str) -> String {
    fingerprint::fingerprint(
        crate::types::AlertEvent::SyncError,
        instance.protocol.as_str(),
        instance.chain.as_str(),
        &symbol::normalize(symbol),
        &instance.instance_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::traits::FeedFilter;
    use crate::types::{
        BatchPriceResult, Capabilities, Chain, FailedSymbol, HealthStatus, Protocol,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeClient {
        block: u64,
        symbols: Vec<String>,
        responses: Mutex<Vec<BatchPriceResult>>,
    }

    #[async_trait]
    impl OracleClient for FakeClient {
        async fn fetch_price(&self, _symbol: &str) -> Result<Option<PriceFeed>, UpstreamError> {
            Ok(None)
        }

        async fn get_prices(&self, _symbols: &[String]) -> BatchPriceResult {
            self.responses.lock().unwrap().remove(0)
        }

        async fn health_check(&self) -> Result<HealthStatus, crate::error::HealthCheckError> {
            Ok(HealthStatus { status: SyncStatus::Healthy, latency_ms: 1, issues: vec![] })
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities { price_feeds: true, batch_queries: true, websocket: false }
        }

        async fn block_number(&self) -> u64 {
            self.block
        }

        fn available_symbols(&self) -> Vec<String> {
            self.symbols.clone()
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        feeds: Mutex<Vec<PriceFeed>>,
        updates: Mutex<Vec<PriceUpdate>>,
        states: Mutex<Vec<SyncState>>,
    }

    #[async_trait]
    impl PersistenceGateway for FakeGateway {
        async fn upsert_feeds(&self, _instance_id: &str, feeds: &[PriceFeed]) -> Result<(), PersistenceError> {
            self.feeds.lock().unwrap().extend_from_slice(feeds);
            Ok(())
        }

        async fn insert_updates(&self, updates: &[PriceUpdate]) -> Result<(), PersistenceError> {
            self.updates.lock().unwrap().extend_from_slice(updates);
            Ok(())
        }

        async fn read_sync_state(&self, instance_id: &str) -> Result<Option<SyncState>, PersistenceError> {
            Ok(self.states.lock().unwrap().iter().rev().find(|s| s.instance_id == instance_id).cloned())
        }

        async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), PersistenceError> {
            self.states.lock().unwrap().push(state.clone());
            Ok(())
        }

        async fn list_feeds(&self, _filter: &FeedFilter) -> Result<Vec<PriceFeed>, PersistenceError> {
            Ok(self.feeds.lock().unwrap().clone())
        }

        async fn query_recent_feeds(&self, _symbol: &str, _window: chrono::Duration) -> Result<Vec<PriceFeed>, PersistenceError> {
            Ok(self.feeds.lock().unwrap().clone())
        }

        async fn cleanup_old_data(&self, _retention_days: i64) -> Result<u64, PersistenceError> {
            Ok(0)
        }

        async fn find_alert_by_fingerprint(&self, _fingerprint: &str) -> Result<Option<crate::types::Alert>, PersistenceError> {
            Ok(None)
        }

        async fn save_alert(&self, _alert: &crate::types::Alert) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn feed(symbol: &str, price: f64) -> PriceFeed {
        PriceFeed {
            feed_id: format!("feed-{symbol}-{price}"),
            instance_id: "ci-eth-main".to_string(),
            protocol: Protocol::Chainlink,
            chain: Chain::Ethereum,
            symbol: symbol.to_string(),
            base_asset: symbol.split('/').next().unwrap_or(symbol).to_string(),
            quote_asset: "USD".to_string(),
            price,
            price_raw: price.to_string(),
            decimals: 8,
            timestamp: Utc::now(),
            block_number: 100,
            confidence: None,
            sources: None,
            is_stale: false,
            staleness_seconds: 0,
            tx_hash: None,
            log_index: None,
        }
    }

    fn instance() -> ResolvedInstance {
        ResolvedInstance {
            instance_id: "ci-eth-main".to_string(),
            protocol: Protocol::Chainlink,
            chain: Chain::Ethereum,
            rpc_url: "https://example".to_string(),
            protocol_config: Default::default(),
            sync_interval: std::time::Duration::from_secs(60),
            batch_size: 100,
            max_concurrency: 5,
            price_change_threshold: 0.0010,
            staleness_threshold_secs: 300,
        }
    }

    #[tokio::test]
    async fn scenario_1_normal_tick_emits_no_updates() {
        let client = Arc::new(FakeClient {
            block: 100,
            symbols: vec!["ETH/USD".to_string(), "BTC/USD".to_string()],
            responses: Mutex::new(vec![BatchPriceResult {
                prices: vec![feed("ETH/USD", 1800.0), feed("BTC/USD", 35000.0)],
                failed: vec![],
                duration_ms: 5,
            }]),
        });
        let gateway = Arc::new(FakeGateway::default());
        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let sync = SyncInstance::new(instance(), client, gateway.clone(), audit);

        let outcome = sync.tick().await;
        assert!(outcome.ok);
        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.updates_emitted, 0);
        assert_eq!(gateway.feeds.lock().unwrap().len(), 2);
        assert_eq!(gateway.updates.lock().unwrap().len(), 0);
        assert_eq!(gateway.states.lock().unwrap().last().unwrap().status, SyncStatus::Healthy);
    }

    #[tokio::test]
    async fn scenario_2_price_change_crosses_threshold() {
        let client = Arc::new(FakeClient {
            block: 100,
            symbols: vec!["ETH/USD".to_string(), "BTC/USD".to_string()],
            responses: Mutex::new(vec![
                BatchPriceResult {
                    prices: vec![feed("ETH/USD", 1800.0), feed("BTC/USD", 35000.0)],
                    failed: vec![],
                    duration_ms: 5,
                },
                BatchPriceResult {
                    prices: vec![feed("ETH/USD", 1801.80), feed("BTC/USD", 35001.0)],
                    failed: vec![],
                    duration_ms: 5,
                },
            ]),
        });
        let gateway = Arc::new(FakeGateway::default());
        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let sync = SyncInstance::new(instance(), client, gateway.clone(), audit);

        sync.tick().await;
        let outcome = sync.tick().await;

        assert_eq!(outcome.updates_emitted, 1, "only ETH crosses the 0.10% threshold");
        let updates = gateway.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert!((updates[0].price_change - 1.8).abs() < 1e-9);
        assert!((updates[0].price_change_percent - 0.10).abs() < 1e-6);
    }

    #[tokio::test]
    async fn scenario_3_partial_failure_keeps_tick_healthy() {
        let client = Arc::new(FakeClient {
            block: 100,
            symbols: vec!["ETH/USD".to_string(), "BTC/USD".to_string()],
            responses: Mutex::new(vec![BatchPriceResult {
                prices: vec![feed("ETH/USD", 1800.0)],
                failed: vec![FailedSymbol { symbol: "BTC/USD".to_string(), error: "transient".to_string() }],
                duration_ms: 5,
            }]),
        });
        let gateway = Arc::new(FakeGateway::default());
        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let sync = SyncInstance::new(instance(), client, gateway.clone(), audit.clone());

        let outcome = sync.tick().await;
        assert!(outcome.ok);
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(gateway.states.lock().unwrap().last().unwrap().status, SyncStatus::Healthy);
        assert_eq!(gateway.states.lock().unwrap().last().unwrap().consecutive_failures, 0);

        let entries = audit.query(&crate::audit::AuditFilter::default(), 10, 0);
        assert!(entries.iter().any(|e| e.action == "sync.symbol.fetch_failed" && e.entity_id.as_deref() == Some("BTC/USD")));
    }

    #[tokio::test]
    async fn consecutive_failures_flip_status_to_error_at_k() {
        let client = Arc::new(FakeClient {
            block: 100,
            symbols: vec!["ETH/USD".to_string()],
            responses: Mutex::new((0..CONSECUTIVE_FAILURE_THRESHOLD).map(|_| BatchPriceResult::default()).collect()),
        });

        struct FailingGateway;
        #[async_trait]
        impl PersistenceGateway for FailingGateway {
            async fn upsert_feeds(&self, _: &str, _: &[PriceFeed]) -> Result<(), PersistenceError> {
                Err(PersistenceError::Transient("down".into()))
            }
            async fn insert_updates(&self, _: &[PriceUpdate]) -> Result<(), PersistenceError> { Ok(()) }
            async fn read_sync_state(&self, _: &str) -> Result<Option<SyncState>, PersistenceError> { Ok(None) }
            async fn upsert_sync_state(&self, _: &SyncState) -> Result<(), PersistenceError> { Ok(()) }
            async fn list_feeds(&self, _: &FeedFilter) -> Result<Vec<PriceFeed>, PersistenceError> { Ok(vec![]) }
            async fn query_recent_feeds(&self, _: &str, _: chrono::Duration) -> Result<Vec<PriceFeed>, PersistenceError> { Ok(vec![]) }
            async fn cleanup_old_data(&self, _: i64) -> Result<u64, PersistenceError> { Ok(0) }
            async fn find_alert_by_fingerprint(&self, _: &str) -> Result<Option<crate::types::Alert>, PersistenceError> { Ok(None) }
            async fn save_alert(&self, _: &crate::types::Alert) -> Result<(), PersistenceError> { Ok(()) }
        }

        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let sync = SyncInstance::new(instance(), client, Arc::new(FailingGateway), audit);

        let mut last = TickOutcome::default();
        for _ in 0..CONSECUTIVE_FAILURE_THRESHOLD {
            last = sync.tick().await;
        }
        assert!(!last.ok);
        assert_eq!(sync.consecutive_failures.load(Ordering::SeqCst), CONSECUTIVE_FAILURE_THRESHOLD);
    }
}
