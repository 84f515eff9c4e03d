//! Cross-protocol/cross-chain aggregation (C6, §4.6).
//!
//! Pure statistics over the most recent feed per `(protocol, chain, symbol)`
//! within a window; the caller (the binary's aggregator tick task) is
//! responsible for gathering that input set from `PersistenceGateway`.

use crate::types::PriceFeed;
use std::collections::HashMap;

/// One chain's contribution to a symbol's aggregate.
#[derive(Debug, Clone)]
pub struct ChainPrice {
    pub chain: String,
    pub protocol: String,
    pub price: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Deviation {
    pub chain: String,
    pub deviation_percent: f64,
    pub is_outlier: bool,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub most_reliable_chain: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SymbolAggregate {
    pub symbol: String,
    pub avg_price: f64,
    pub median_price: f64,
    pub min_chain: String,
    pub max_chain: String,
    pub price_range_percent: f64,
    pub prices_by_chain: Vec<ChainPrice>,
    pub deviations: Vec<Deviation>,
    pub recommendation: Option<Recommendation>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1 denominator); 0 for n < 2.
fn sample_stddev(values: &[f64], avg: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// `sorted[n/2]` — the *lower* median for even n, as specified.
fn lower_median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sorted[sorted.len() / 2]
}

/// Build the per-symbol aggregate from the most recent per-chain feeds.
/// `feeds` must already be filtered to one symbol and the desired window.
pub fn aggregate_symbol(symbol: &str, feeds: &[PriceFeed]) -> Option<SymbolAggregate> {
    if feeds.is_empty() {
        return None;
    }

    let prices: Vec<f64> = feeds.iter().map(|f| f.price).collect();
    let avg = mean(&prices);
    let median = lower_median(&prices);
    // §9 open question, resolved: sigma over raw prices, never over
    // deviation-percent.
    let sigma = sample_stddev(&prices, avg);

    let min_feed = feeds.iter().min_by(|a, b| a.price.partial_cmp(&b.price).unwrap()).unwrap();
    let max_feed = feeds.iter().max_by(|a, b| a.price.partial_cmp(&b.price).unwrap()).unwrap();
    let price_range_percent = if avg != 0.0 {
        (max_feed.price - min_feed.price) / avg * 100.0
    } else {
        0.0
    };

    let prices_by_chain: Vec<ChainPrice> = feeds
        .iter()
        .map(|f| ChainPrice {
            chain: f.chain.as_str().to_string(),
            protocol: f.protocol.as_str().to_string(),
            price: f.price,
            confidence: f.confidence,
        })
        .collect();

    let deviations: Vec<Deviation> = feeds
        .iter()
        .map(|f| {
            let deviation_percent = if avg != 0.0 { (f.price - avg) / avg * 100.0 } else { 0.0 };
            let absolute_deviation = (f.price - avg).abs();
            Deviation {
                chain: f.chain.as_str().to_string(),
                deviation_percent,
                is_outlier: sigma > 0.0 && absolute_deviation > 2.0 * sigma,
            }
        })
        .collect();

    Some(SymbolAggregate {
        symbol: symbol.to_string(),
        avg_price: avg,
        median_price: median,
        min_chain: min_feed.chain.as_str().to_string(),
        max_chain: max_feed.chain.as_str().to_string(),
        price_range_percent,
        prices_by_chain,
        deviations,
        recommendation: None,
    })
}

/// Pick the chain with the smallest rolling standard deviation of its
/// deviation over the last `k` ticks; ties broken by lowest current
/// confidence interval (§4.6). `history` maps chain -> its deviation-percent
/// samples over the last `k` ticks, most recent last.
pub fn most_reliable_chain(
    history: &HashMap<String, Vec<f64>>,
    current_confidence: &HashMap<String, f64>,
) -> Option<Recommendation> {
    let mut best: Option<(String, f64, f64)> = None; // (chain, rolling_stddev, confidence)

    for (chain, samples) in history {
        if samples.is_empty() {
            continue;
        }
        let avg = mean(samples);
        let stddev = sample_stddev(samples, avg);
        let confidence = *current_confidence.get(chain).unwrap_or(&f64::INFINITY);

        let better = match &best {
            None => true,
            Some((_, best_stddev, best_confidence)) => {
                stddev < *best_stddev || (stddev == *best_stddev && confidence < *best_confidence)
            }
        };
        if better {
            best = Some((chain.clone(), stddev, confidence));
        }
    }

    best.map(|(chain, stddev, _)| Recommendation {
        most_reliable_chain: chain,
        reason: format!("lowest rolling deviation stddev over window ({stddev:.4})"),
    })
}

/// Pearson correlation between two equal-length, tick-aligned series.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mean_a = mean(a);
    let mean_b = mean(b);
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Build a symmetric n×n correlation matrix across chains for one symbol.
/// `series` maps chain -> price series already aligned to a common tick
/// grid with missing samples carried forward by the caller.
pub fn correlation_matrix(series: &HashMap<String, Vec<f64>>) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut chains: Vec<String> = series.keys().cloned().collect();
    chains.sort();
    let n = chains.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let corr = pearson_correlation(&series[&chains[i]], &series[&chains[j]]);
            matrix[i][j] = corr;
            matrix[j][i] = corr;
        }
    }
    (chains, matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chain, Protocol};
    use chrono::Utc;

    fn feed(chain: Chain, price: f64) -> PriceFeed {
        PriceFeed {
            feed_id: format!("feed-{}", chain.as_str()),
            instance_id: "inst".to_string(),
            protocol: Protocol::Chainlink,
            chain,
            symbol: "ETH/USD".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USD".to_string(),
            price,
            price_raw: price.to_string(),
            decimals: 8,
            timestamp: Utc::now(),
            block_number: 1,
            confidence: None,
            sources: None,
            is_stale: false,
            staleness_seconds: 0,
            tx_hash: None,
            log_index: None,
        }
    }

    #[test]
    fn cross_chain_deviation_flags_bsc_outlier_only() {
        // §8 scenario 5: ethereum=1800, polygon=1802, arbitrum=1799, bsc=2100.
        let feeds = vec![
            feed(Chain::Ethereum, 1800.0),
            feed(Chain::Polygon, 1802.0),
            feed(Chain::Arbitrum, 1799.0),
            feed(Chain::Bsc, 2100.0),
        ];
        let agg = aggregate_symbol("ETH/USD", &feeds).unwrap();
        assert!((agg.avg_price - 1875.25).abs() < 0.01);

        let bsc = agg.deviations.iter().find(|d| d.chain == "bsc").unwrap();
        assert!(bsc.is_outlier, "bsc should be flagged as outlier");

        for d in agg.deviations.iter().filter(|d| d.chain != "bsc") {
            assert!(!d.is_outlier, "{} should not be an outlier", d.chain);
        }
    }

    #[test]
    fn lower_median_for_even_count() {
        assert_eq!(lower_median(&[1.0, 2.0, 3.0, 4.0]), 2.0);
    }

    #[test]
    fn correlation_matrix_has_ones_on_diagonal() {
        let mut series = HashMap::new();
        series.insert("ethereum".to_string(), vec![1.0, 2.0, 3.0, 4.0]);
        series.insert("polygon".to_string(), vec![1.1, 2.1, 2.9, 4.2]);
        let (chains, matrix) = correlation_matrix(&series);
        for i in 0..chains.len() {
            assert!((matrix[i][i] - 1.0).abs() < 1e-9);
        }
        assert_eq!(matrix[0][1], matrix[1][0]);
    }

    #[test]
    fn most_reliable_chain_prefers_lowest_rolling_stddev() {
        let mut history = HashMap::new();
        history.insert("ethereum".to_string(), vec![0.1, -0.1, 0.05, -0.05]);
        history.insert("bsc".to_string(), vec![5.0, -4.0, 6.0, -5.0]);
        let confidence = HashMap::new();
        let rec = most_reliable_chain(&history, &confidence).unwrap();
        assert_eq!(rec.most_reliable_chain, "ethereum");
    }

    #[test]
    fn empty_feeds_yields_no_aggregate() {
        assert!(aggregate_symbol("ETH/USD", &[]).is_none());
    }
}
