//! Oracle Aggregation Engine
//!
//! Polls on-chain and REST-based price oracles across protocols and chains,
//! persists a normalized view, and raises alerts on deviation, staleness,
//! and sync failures.
//! - `SyncOrchestrator` drives one polling loop per configured instance
//! - `Aggregator` computes cross-protocol/cross-chain views on a tick
//! - `AlertEvaluator` scans sync state and recent feeds against stored rules
//! - `AuditBuffer` records every component's audit trail and flushes it out-of-band

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oracle_core::config::defaults::DEFAULT_RETENTION_DAYS;
use oracle_core::config::instance::ResolvedInstance;
use oracle_core::config::loader::load_catalog_dir;
use oracle_core::{
    aggregate_symbol, config, generate_audit_id, init_config, ActorType, AlertEvaluator,
    AlertStore, AppConfig, AuditBuffer, AuditEntry, ClientFactory, DeviationInput,
    EvaluationContext, KvIncidentBackend, KvRuleBackend, NotificationSender, OracleClient,
    PersistenceGateway, RuleBackend, Severity, SyncOrchestrator,
};

/// Environment variable names read once at startup.
mod env {
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const CATALOG_DIR: &str = "ORACLE_CATALOG_DIR";
}

const DEFAULT_CATALOG_DIR: &str = "config/instances";

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,oracle_core=debug,oracle_chain=debug,oracle_api=debug")),
        )
        .init();

    let app_config = AppConfig::from_env();
    app_config.log_config();
    init_config(app_config);

    info!("starting oracle aggregation engine");

    let database_url = std::env::var(env::DATABASE_URL)
        .map_err(|_| anyhow::anyhow!("missing env var: {}", env::DATABASE_URL))?;
    let pool = oracle_db::connect(&database_url).await?;
    oracle_db::run_migrations(&pool).await?;

    let audit_conf = &config().audit;
    let audit = Arc::new(AuditBuffer::new(
        audit_conf.ring_capacity,
        audit_conf.queue_capacity,
        audit_conf.flush_batch_size,
        audit_conf.flush_debounce(),
    ));

    let catalog_dir =
        std::env::var(env::CATALOG_DIR).unwrap_or_else(|_| DEFAULT_CATALOG_DIR.to_string());
    let catalog = load_catalog_dir(&catalog_dir)
        .with_context(|| format!("loading instance catalog from {catalog_dir}"))?;
    info!(
        loaded = catalog.instances.len(),
        skipped = catalog.skipped.len(),
        dir = %catalog_dir,
        "instance catalog loaded"
    );
    for skipped in &catalog.skipped {
        warn!(instance_id = %skipped.instance_id, reason = %skipped.reason, "instance skipped at load");
        audit.log(AuditEntry {
            id: generate_audit_id(),
            timestamp: chrono::Utc::now(),
            actor: "catalog_loader".to_string(),
            actor_type: ActorType::System,
            action: "catalog.instance.skipped".to_string(),
            severity: Severity::Warning,
            entity_type: Some("instance".to_string()),
            entity_id: Some(skipped.instance_id.clone()),
            details: Default::default(),
            success: false,
            error_message: Some(skipped.reason.to_string()),
        });
    }

    let gateway: Arc<dyn PersistenceGateway> = Arc::new(oracle_db::PostgresGateway::new(pool.clone()));
    let kv: Arc<dyn oracle_core::KvStore> = Arc::new(oracle_db::PostgresKvStore::new(pool.clone()));
    let notifier: Arc<dyn NotificationSender> = Arc::new(
        oracle_api::WebhookNotificationSender::from_env()
            .context("constructing alert notification sender")?,
    );

    let instance_ids: Vec<String> = catalog.instances.iter().map(|i| i.instance_id.clone()).collect();
    let symbols = distinct_symbols(&catalog.instances);

    let factory: Arc<dyn ClientFactory> = Arc::new(DispatchingClientFactory);
    let orchestrator = Arc::new(SyncOrchestrator::new(gateway.clone(), audit.clone(), factory));

    let flusher_shutdown = Arc::new(tokio::sync::Notify::new());
    let flusher_handle = if config().disable_embedded_worker {
        info!("INSIGHT_DISABLE_EMBEDDED_WORKER set, audit entries will accumulate in the ring only");
        None
    } else {
        let audit_sink = Arc::new(
            oracle_api::HttpAuditSink::from_env().context("constructing audit sink")?,
        );
        let flusher_audit = audit.clone();
        let shutdown = flusher_shutdown.clone();
        Some(tokio::spawn(async move { flusher_audit.run_flusher(audit_sink, shutdown).await }))
    };

    orchestrator.start_all(catalog.instances).await;

    let alert_store = Arc::new(AlertStore::new());
    let incident_backend: Arc<dyn oracle_core::IncidentBackend> = Arc::new(KvIncidentBackend::new(kv.clone()));
    let evaluator = Arc::new(AlertEvaluator::new(gateway.clone(), notifier, alert_store, incident_backend));
    let rule_backend = Arc::new(KvRuleBackend::new(kv.clone(), audit.clone()));

    let aggregator_handle = tokio::spawn(run_aggregator_tick(gateway.clone(), symbols.clone()));
    let alert_handle = tokio::spawn(run_alert_tick(
        gateway.clone(),
        evaluator,
        rule_backend,
        instance_ids,
        symbols,
    ));
    let cleanup_handle = tokio::spawn(run_cleanup_tick(gateway.clone()));

    info!("all components started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received, draining in-flight work");

    orchestrator.stop_all().await;
    aggregator_handle.abort();
    alert_handle.abort();
    cleanup_handle.abort();

    flusher_shutdown.notify_one();
    if let Some(handle) = flusher_handle {
        let _ = handle.await;
    }

    info!("shutdown complete");
    Ok(())
}

/// Dispatches each resolved instance to the on-chain or HTTP `OracleClient`
/// implementation based on `Protocol::is_onchain` (§4.1).
struct DispatchingClientFactory;

impl ClientFactory for DispatchingClientFactory {
    fn build(&self, instance: &ResolvedInstance) -> Result<Arc<dyn OracleClient>> {
        if instance.protocol.is_onchain() {
            // `oracle_chain::connect` is async (it builds an alloy provider);
            // `ClientFactory::build` is sync, so hop onto a blocking context
            // rather than making the whole trait async for one transport.
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(oracle_chain::connect(instance))
            })
        } else {
            Ok(Arc::new(oracle_api::HttpOracleClient::from_instance(instance)?))
        }
    }
}

/// Collects every symbol named in any instance's `feeds` or `assets`
/// protocol_config table, normalized and deduplicated.
fn distinct_symbols(instances: &[ResolvedInstance]) -> Vec<String> {
    let mut set = std::collections::BTreeSet::new();
    for instance in instances {
        for key in ["feeds", "assets"] {
            if let Some(table) = instance.protocol_config.get(key).and_then(|v| v.as_object()) {
                for symbol in table.keys() {
                    set.insert(oracle_core::symbol::normalize(symbol));
                }
            }
        }
    }
    set.into_iter().collect()
}

/// Periodic cross-protocol aggregation pass (§4.6): for each tracked symbol,
/// pull recent feeds within the configured window and log the aggregate.
async fn run_aggregator_tick(gateway: Arc<dyn PersistenceGateway>, symbols: Vec<String>) {
    let mut ticker = tokio::time::interval(config().aggregation.tick_interval());
    loop {
        ticker.tick().await;
        let window = chrono::Duration::seconds(config().aggregation.window_secs as i64);
        for symbol in &symbols {
            let feeds = match gateway.query_recent_feeds(symbol, window).await {
                Ok(feeds) => feeds,
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "aggregator tick failed to read recent feeds");
                    continue;
                }
            };
            if let Some(aggregate) = aggregate_symbol(symbol, &feeds) {
                info!(
                    symbol = %symbol,
                    avg_price = aggregate.avg_price,
                    price_range_percent = aggregate.price_range_percent,
                    outliers = aggregate.deviations.iter().filter(|d| d.is_outlier).count(),
                    "aggregator tick"
                );
            }
        }
    }
}

/// Periodic alert evaluation pass (§4.7): gather sync state and recent
/// feeds, reload the rule set, and run one evaluation pass.
async fn run_alert_tick(
    gateway: Arc<dyn PersistenceGateway>,
    evaluator: Arc<AlertEvaluator>,
    rules: Arc<KvRuleBackend>,
    instance_ids: Vec<String>,
    symbols: Vec<String>,
) {
    let mut ticker = tokio::time::interval(config().alerting.tick_interval());
    loop {
        ticker.tick().await;

        let rule_set = match rules.load().await {
            Ok(rules) => rules,
            Err(err) => {
                error!(error = %err, "alert tick failed to load rules, skipping pass");
                continue;
            }
        };
        if rule_set.is_empty() {
            continue;
        }

        let mut sync_states = Vec::new();
        for instance_id in &instance_ids {
            if let Ok(Some(state)) = gateway.read_sync_state(instance_id).await {
                sync_states.push(state);
            }
        }

        let window = chrono::Duration::seconds(config().aggregation.window_secs as i64);
        let mut recent_feeds = Vec::new();
        let mut deviations = Vec::new();
        for symbol in &symbols {
            match gateway.query_recent_feeds(symbol, window).await {
                Ok(feeds) => {
                    if let Some(aggregate) = aggregate_symbol(symbol, &feeds) {
                        for (feed, deviation) in feeds.iter().zip(aggregate.deviations.iter()) {
                            if deviation.is_outlier {
                                deviations.push(DeviationInput {
                                    protocol: feed.protocol,
                                    chain: feed.chain.as_str().to_string(),
                                    instance_id: feed.instance_id.clone(),
                                    symbol: symbol.clone(),
                                    deviation_percent: deviation.deviation_percent,
                                });
                            }
                        }
                    }
                    recent_feeds.extend(feeds);
                }
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "alert tick failed to read recent feeds");
                }
            }
        }

        let ctx = EvaluationContext { sync_states, recent_feeds, deviations };
        evaluator.evaluate(&rule_set, &ctx).await;
    }
}

/// Daily retention sweep (§4.4 `cleanup_old_data`): drops feed and update
/// rows older than the default 90-day retention window.
async fn run_cleanup_tick(gateway: Arc<dyn PersistenceGateway>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
    loop {
        ticker.tick().await;
        match gateway.cleanup_old_data(DEFAULT_RETENTION_DAYS).await {
            Ok(deleted) => info!(deleted, retention_days = DEFAULT_RETENTION_DAYS, "retention cleanup complete"),
            Err(err) => warn!(error = %err, "retention cleanup failed"),
        }
    }
}

fn print_banner() {
    println!(
        r#"
    ╔═╗╦═╗╔═╗╔═╗╦  ╔═╗  ╔═╗╔═╗╔═╗╦═╗╔═╗╔═╗╔═╗╔╦╗╔═╗╦═╗
    ║ ║╠╦╝╠═╣║  ║  ║╣   ╠═╣║ ╦║ ╦╠╦╝║╣ ║ ╦╠═╣ ║ ║ ║╠╦╝
    ╚═╝╩╚═╩ ╩╚═╝╩═╝╚═╝  ╩ ╩╚═╝╚═╝╩╚═╚═╝╚═╝╩ ╩ ╩ ╚═╝╩╚═
    Oracle Aggregation Engine v0.1.0
    "#
    );
}
