//! On-chain `OracleClient` for the RPC-read protocols — Chainlink, API3,
//! RedStone, Flux, Switchboard (C1, §4.1). All five expose the same
//! "latest value + timestamp, read via an aggregator-shaped contract"
//! pattern on EVM chains, so one generic client (grounded on
//! `oracle::chainlink::ChainlinkOracle`'s `sol!`/`ProviderBuilder` usage)
//! covers all of them; `protocol` only changes labeling and defaults.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::sol;
use async_trait::async_trait;
use oracle_core::concurrency;
use oracle_core::config::instance::ResolvedInstance;
use oracle_core::error::{HealthCheckError, UpstreamError};
use oracle_core::retry::with_retry;
use oracle_core::symbol;
use oracle_core::traits::OracleClient;
use oracle_core::types::{
    BatchPriceResult, Capabilities, Chain, FailedSymbol, HealthStatus, PriceFeed, Protocol,
    SyncStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

sol! {
    #[sol(rpc)]
    interface IPriceAggregator {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );

        function decimals() external view returns (uint8);
    }
}

const MAX_RETRY_ATTEMPTS: u32 = 3;

fn map_contract_err(err: impl std::fmt::Display) -> UpstreamError {
    let message = err.to_string();
    if message.to_lowercase().contains("revert") {
        UpstreamError::Permanent(message)
    } else {
        UpstreamError::Transient(message)
    }
}

/// A single (protocol, chain) on-chain instance. `feeds` maps a normalized
/// symbol to the aggregator contract address configured for it.
pub struct OnchainOracleClient<P> {
    protocol: Protocol,
    chain: Chain,
    instance_id: String,
    provider: P,
    feeds: HashMap<String, Address>,
    max_concurrency: usize,
}

impl<P: Provider + Clone + Send + Sync + 'static> OnchainOracleClient<P> {
    pub fn new(
        protocol: Protocol,
        chain: Chain,
        instance_id: String,
        provider: P,
        feeds: HashMap<String, Address>,
        max_concurrency: usize,
    ) -> Self {
        Self { protocol, chain, instance_id, provider, feeds, max_concurrency }
    }

    async fn read_feed(&self, symbol: &str, address: Address) -> Result<PriceFeed, UpstreamError> {
        let contract = IPriceAggregator::new(address, &self.provider);

        let decimals = with_retry(
            || async { contract.decimals().call().await.map(|r| r._0).map_err(map_contract_err) },
            MAX_RETRY_ATTEMPTS,
        )
        .await?;

        let round = with_retry(
            || async { contract.latestRoundData().call().await.map_err(map_contract_err) },
            MAX_RETRY_ATTEMPTS,
        )
        .await?;

        if round.answer.is_negative() {
            return Err(UpstreamError::Permanent(format!("{symbol}: negative answer from aggregator")));
        }

        let price_raw = round.answer.to_string();
        let scale = 10f64.powi(decimals as i32);
        let price = round.answer.to_string().parse::<f64>().unwrap_or(0.0) / scale;

        let block_number = self.provider.get_block_number().await.unwrap_or(0);
        let timestamp = chrono::DateTime::from_timestamp(round.updatedAt.to::<u64>() as i64, 0)
            .unwrap_or_else(chrono::Utc::now);
        let (base, quote) = symbol::split_base_quote(symbol);

        let mut feed = PriceFeed {
            feed_id: PriceFeed::compute_feed_id(self.protocol, &self.chain, symbol, timestamp),
            instance_id: self.instance_id.clone(),
            protocol: self.protocol,
            chain: self.chain.clone(),
            symbol: symbol.to_string(),
            base_asset: base,
            quote_asset: quote,
            price,
            price_raw,
            decimals,
            timestamp,
            block_number,
            confidence: None,
            sources: Some(vec![self.protocol.as_str().to_string()]),
            is_stale: false,
            staleness_seconds: 0,
            tx_hash: None,
            log_index: None,
        };
        feed.refresh_staleness(chrono::Utc::now(), 300);
        Ok(feed)
    }
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> OracleClient for OnchainOracleClient<P> {
    async fn fetch_price(&self, symbol: &str) -> Result<Option<PriceFeed>, UpstreamError> {
        let normalized = symbol::normalize(symbol);
        let Some(&address) = self.feeds.get(&normalized) else { return Ok(None) };
        self.read_feed(&normalized, address).await.map(Some)
    }

    async fn get_prices(&self, symbols: &[String]) -> BatchPriceResult {
        let start = Instant::now();
        let results = concurrency::run(
            symbols.to_vec(),
            |symbol| async move {
                match self.fetch_price(&symbol).await {
                    Ok(Some(feed)) => Some(Ok(feed)),
                    Ok(None) => Some(Err(FailedSymbol { symbol, error: "unknown symbol".to_string() })),
                    Err(err) => Some(Err(FailedSymbol { symbol, error: err.to_string() })),
                }
            },
            self.max_concurrency,
        )
        .await;

        let mut prices = Vec::new();
        let mut failed = Vec::new();
        for outcome in results.into_iter().flatten() {
            match outcome {
                Ok(feed) => prices.push(feed),
                Err(fs) => failed.push(fs),
            }
        }
        BatchPriceResult { prices, failed, duration_ms: start.elapsed().as_millis() as u64 }
    }

    async fn health_check(&self) -> Result<HealthStatus, HealthCheckError> {
        let start = Instant::now();
        match self.provider.get_block_number().await {
            Ok(block) if block > 0 => {
                Ok(HealthStatus { status: SyncStatus::Healthy, latency_ms: start.elapsed().as_millis() as u64, issues: vec![] })
            }
            Ok(_) => Ok(HealthStatus {
                status: SyncStatus::Lagging,
                latency_ms: start.elapsed().as_millis() as u64,
                issues: vec!["rpc reported block 0".to_string()],
            }),
            Err(err) => {
                warn!(instance_id = %self.instance_id, error = %err, "onchain oracle health check failed");
                Err(HealthCheckError { protocol: self.protocol, chain: self.chain.clone(), reason: err.to_string() })
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { price_feeds: true, batch_queries: true, websocket: false }
    }

    async fn block_number(&self) -> u64 {
        self.provider.get_block_number().await.unwrap_or(0)
    }

    fn available_symbols(&self) -> Vec<String> {
        self.feeds.keys().cloned().collect()
    }
}

/// Parses `protocol_config.feeds` (`{ "BTC/USD": "0x...", ... }`) into a
/// normalized symbol -> address table.
fn parse_feed_table(instance: &ResolvedInstance) -> anyhow::Result<HashMap<String, Address>> {
    let feeds_value = instance
        .protocol_config
        .get("feeds")
        .ok_or_else(|| anyhow::anyhow!("protocol_config missing `feeds` table for instance {}", instance.instance_id))?;
    let feeds_obj = feeds_value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("`feeds` must be a table of symbol -> address"))?;

    let mut feeds = HashMap::new();
    for (symbol, address) in feeds_obj {
        let address_str = address
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("feed address for {symbol} must be a string"))?;
        let address: Address = address_str
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid feed address for {symbol}: {e}"))?;
        feeds.insert(symbol::normalize(symbol), address);
    }
    Ok(feeds)
}

/// Builds the concrete `OnchainOracleClient<RootProvider<Http<..>>>` behind
/// a trait object, keeping the provider's transport type out of every
/// caller's signature.
pub async fn connect(instance: &ResolvedInstance) -> anyhow::Result<Arc<dyn OracleClient>> {
    let feeds = parse_feed_table(instance)?;
    let provider = ProviderBuilder::new().on_http(instance.rpc_url.parse()?);
    Ok(Arc::new(OnchainOracleClient::new(
        instance.protocol,
        instance.chain.clone(),
        instance.instance_id.clone(),
        provider,
        feeds,
        instance.max_concurrency,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_table_parses_symbol_to_address() {
        let mut protocol_config = std::collections::HashMap::new();
        protocol_config.insert(
            "feeds".to_string(),
            serde_json::json!({ "BTC/USD": "0x0000000000000000000000000000000000000001" }),
        );
        let instance = ResolvedInstance {
            instance_id: "ci".to_string(),
            protocol: Protocol::Chainlink,
            chain: Chain::Ethereum,
            rpc_url: "https://example".to_string(),
            protocol_config,
            sync_interval: std::time::Duration::from_secs(60),
            batch_size: 100,
            max_concurrency: 5,
            price_change_threshold: 0.001,
            staleness_threshold_secs: 300,
        };
        let feeds = parse_feed_table(&instance).unwrap();
        assert!(feeds.contains_key("BTC/USD"));
    }

    #[test]
    fn missing_feeds_table_is_an_error() {
        let instance = ResolvedInstance {
            instance_id: "ci".to_string(),
            protocol: Protocol::Chainlink,
            chain: Chain::Ethereum,
            rpc_url: "https://example".to_string(),
            protocol_config: Default::default(),
            sync_interval: std::time::Duration::from_secs(60),
            batch_size: 100,
            max_concurrency: 5,
            price_change_threshold: 0.001,
            staleness_threshold_secs: 300,
        };
        assert!(parse_feed_table(&instance).is_err());
    }
}
