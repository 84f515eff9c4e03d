//! HTTP `OracleClient` for the REST-polled protocols — DIA, Pyth, Band
//! (C1, §4.1). All three are modeled the same way: `GET {endpoint}/quotation/{asset}`
//! returning `{price, timestamp}` scaled to 8 decimals, a generic shape
//! any "or equivalent" REST protocol can be onboarded onto.

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
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct QuotationResponse {
    price: f64,
    /// Unix seconds. DIA/Pyth/Band all report upstream freshness this way;
    /// absent fields default to "now" rather than failing the parse.
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    decimals: Option<u8>,
}

/// One REST-polled protocol instance. `assets` maps a normalized symbol to
/// the upstream asset identifier used in the quotation path.
pub struct HttpOracleClient {
    protocol: Protocol,
    chain: Chain,
    instance_id: String,
    client: reqwest::Client,
    endpoint: String,
    assets: HashMap<String, String>,
    max_concurrency: usize,
}

impl HttpOracleClient {
    pub fn new(
        protocol: Protocol,
        chain: Chain,
        instance_id: String,
        endpoint: String,
        assets: HashMap<String, String>,
        max_concurrency: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { protocol, chain, instance_id, client, endpoint, assets, max_concurrency }
    }

    /// Build the client from a `ResolvedInstance`'s `protocol_config`:
    /// `{ "endpoint": "https://...", "assets": { "BTC/USD": "bitcoin", ... } }`.
    pub fn from_instance(instance: &ResolvedInstance) -> anyhow::Result<Self> {
        let endpoint = instance
            .protocol_config
            .get("endpoint")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("protocol_config missing `endpoint` for instance {}", instance.instance_id))?
            .trim_end_matches('/')
            .to_string();

        let assets_value = instance
            .protocol_config
            .get("assets")
            .ok_or_else(|| anyhow::anyhow!("protocol_config missing `assets` table for instance {}", instance.instance_id))?;
        let assets_obj = assets_value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("`assets` must be a table of symbol -> asset id"))?;

        let mut assets = HashMap::new();
        for (symbol, asset_id) in assets_obj {
            let asset_id = asset_id
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("asset id for {symbol} must be a string"))?;
            assets.insert(symbol::normalize(symbol), asset_id.to_string());
        }

        Ok(Self::new(
            instance.protocol,
            instance.chain.clone(),
            instance.instance_id.clone(),
            endpoint,
            assets,
            instance.max_concurrency,
        ))
    }

    async fn fetch_quotation(&self, asset_id: &str) -> Result<QuotationResponse, UpstreamError> {
        let url = format!("{}/quotation/{}", self.endpoint, asset_id);
        with_retry(
            || async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Transient(e.to_string()))?;

                if response.status().is_server_error() || response.status() == 429 {
                    return Err(UpstreamError::Transient(format!("upstream status {}", response.status())));
                }
                if !response.status().is_success() {
                    return Err(UpstreamError::Permanent(format!("upstream status {}", response.status())));
                }

                response
                    .json::<QuotationResponse>()
                    .await
                    .map_err(|e| UpstreamError::Permanent(format!("malformed quotation payload: {e}")))
            },
            MAX_RETRY_ATTEMPTS,
        )
        .await
    }
}

#[async_trait]
impl OracleClient for HttpOracleClient {
    async fn fetch_price(&self, symbol: &str) -> Result<Option<PriceFeed>, UpstreamError> {
        let normalized = symbol::normalize(symbol);
        let Some(asset_id) = self.assets.get(&normalized) else { return Ok(None) };

        let quote = self.fetch_quotation(asset_id).await?;
        let decimals = quote.decimals.unwrap_or(8);
        let scale = 10f64.powi(decimals as i32);
        let price_raw = (quote.price * scale).round() as i128;
        let timestamp = quote
            .timestamp
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(chrono::Utc::now);
        let (base, quote_asset) = symbol::split_base_quote(&normalized);

        let mut feed = PriceFeed {
            feed_id: PriceFeed::compute_feed_id(self.protocol, &self.chain, &normalized, timestamp),
            instance_id: self.instance_id.clone(),
            protocol: self.protocol,
            chain: self.chain.clone(),
            symbol: normalized,
            base_asset: base,
            quote_asset,
            price: quote.price,
            price_raw: price_raw.to_string(),
            decimals,
            timestamp,
            block_number: chrono::Utc::now().timestamp() as u64,
            confidence: None,
            sources: Some(vec![self.protocol.as_str().to_string()]),
            is_stale: false,
            staleness_seconds: 0,
            tx_hash: None,
            log_index: None,
        };
        feed.refresh_staleness(chrono::Utc::now(), 300);
        Ok(Some(feed))
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
        let url = format!("{}/health", self.endpoint);
        let result = self.client.get(&url).send().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => {
                Ok(HealthStatus { status: SyncStatus::Healthy, latency_ms, issues: vec![] })
            }
            Ok(response) => Ok(HealthStatus {
                status: SyncStatus::Lagging,
                latency_ms,
                issues: vec![format!("endpoint returned {}", response.status())],
            }),
            Err(err) => {
                warn!(instance_id = %self.instance_id, error = %err, "http oracle health check failed");
                Err(HealthCheckError { protocol: self.protocol, chain: self.chain.clone(), reason: err.to_string() })
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { price_feeds: true, batch_queries: true, websocket: false }
    }

    /// HTTP-only protocols have no block concept; wall-clock seconds stand in (§4.1).
    async fn block_number(&self) -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    fn available_symbols(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }
}
