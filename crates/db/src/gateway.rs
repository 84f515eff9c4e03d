//! Postgres-backed `PersistenceGateway` over the `unified_*` schema (C2, §4.2).
//!
//! Writes are chunked at `batch_size` (default 100) and each chunk is a
//! single multi-row `INSERT ... ON CONFLICT` built with `QueryBuilder`,
//! mirroring the reference's `PostgresStore` batch-write helpers. Each
//! chunk gets one retry on a transient error before the failure surfaces
//! to the caller (§4.2).

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oracle_core::error::PersistenceError;
use oracle_core::traits::{FeedFilter, PersistenceGateway};
use oracle_core::types::{
    Alert, AlertEvent, AlertStatus, Chain, PriceFeed, PriceUpdate, Protocol, Severity, SyncState,
    SyncStatus,
};
use sqlx::{PgPool, QueryBuilder, Row};
use std::str::FromStr;
use tracing::warn;

const DEFAULT_BATCH_SIZE: usize = 100;

pub struct PostgresGateway {
    pool: PgPool,
    batch_size: usize,
}

impl PostgresGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn upsert_feeds_chunk(&self, instance_id: &str, chunk: &[PriceFeed]) -> Result<(), sqlx::Error> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO unified_price_feeds (id, instance_id, protocol, chain, symbol, base_asset, \
             quote_asset, price, price_raw, decimals, timestamp, block_number, confidence, sources, \
             is_stale, staleness_seconds, tx_hash, log_index, updated_at) ",
        );
        qb.push_values(chunk, |mut row, feed| {
            row.push_bind(&feed.feed_id)
                .push_bind(instance_id)
                .push_bind(feed.protocol.as_str())
                .push_bind(feed.chain.as_str())
                .push_bind(&feed.symbol)
                .push_bind(&feed.base_asset)
                .push_bind(&feed.quote_asset)
                .push_bind(feed.price)
                .push_bind(&feed.price_raw)
                .push_bind(feed.decimals as i16)
                .push_bind(feed.timestamp)
                .push_bind(feed.block_number as i64)
                .push_bind(feed.confidence)
                .push_bind(feed.sources.clone())
                .push_bind(feed.is_stale)
                .push_bind(feed.staleness_seconds as i32)
                .push_bind(feed.tx_hash.clone())
                .push_bind(feed.log_index)
                .push_bind(Utc::now());
        });
        qb.push(
            " ON CONFLICT (id) DO UPDATE SET \
             price = EXCLUDED.price, price_raw = EXCLUDED.price_raw, timestamp = EXCLUDED.timestamp, \
             block_number = EXCLUDED.block_number, is_stale = EXCLUDED.is_stale, \
             staleness_seconds = EXCLUDED.staleness_seconds, updated_at = EXCLUDED.updated_at",
        );
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_updates_chunk(&self, chunk: &[PriceUpdate]) -> Result<(), sqlx::Error> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO unified_price_updates (id, feed_id, instance_id, protocol, previous_price, \
             current_price, price_change, price_change_percent, timestamp, block_number) ",
        );
        qb.push_values(chunk, |mut row, update| {
            row.push_bind(&update.id)
                .push_bind(&update.feed_id)
                .push_bind(&update.instance_id)
                .push_bind(update.protocol.as_str())
                .push_bind(update.previous_price)
                .push_bind(update.current_price)
                .push_bind(update.price_change)
                .push_bind(update.price_change_percent)
                .push_bind(update.timestamp)
                .push_bind(update.block_number as i64);
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_status(s: &str) -> SyncStatus {
    match s {
        "lagging" => SyncStatus::Lagging,
        "stalled" => SyncStatus::Stalled,
        "error" => SyncStatus::Error,
        _ => SyncStatus::Healthy,
    }
}

fn status_str(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Healthy => "healthy",
        SyncStatus::Lagging => "lagging",
        SyncStatus::Stalled => "stalled",
        SyncStatus::Error => "error",
    }
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    /// Flushes `feeds` in chunks of `batch_size`; each chunk retries once on
    /// a transient error before the failure surfaces (§4.2).
    async fn upsert_feeds(&self, instance_id: &str, feeds: &[PriceFeed]) -> Result<(), PersistenceError> {
        for chunk in feeds.chunks(self.batch_size) {
            if let Err(first_err) = self.upsert_feeds_chunk(instance_id, chunk).await {
                let mapped = map_sqlx_error(first_err);
                if !matches!(mapped, PersistenceError::Transient(_)) {
                    return Err(mapped);
                }
                warn!(instance_id, error = %mapped, "upsert_feeds chunk failed, retrying once");
                self.upsert_feeds_chunk(instance_id, chunk)
                    .await
                    .map_err(map_sqlx_error)?;
            }
        }
        Ok(())
    }

    async fn insert_updates(&self, updates: &[PriceUpdate]) -> Result<(), PersistenceError> {
        for chunk in updates.chunks(self.batch_size) {
            if let Err(first_err) = self.insert_updates_chunk(chunk).await {
                let mapped = map_sqlx_error(first_err);
                if !matches!(mapped, PersistenceError::Transient(_)) {
                    return Err(mapped);
                }
                warn!(error = %mapped, "insert_updates chunk failed, retrying once");
                self.insert_updates_chunk(chunk).await.map_err(map_sqlx_error)?;
            }
        }
        Ok(())
    }

    async fn read_sync_state(&self, instance_id: &str) -> Result<Option<SyncState>, PersistenceError> {
        let row = sqlx::query(
            "SELECT instance_id, protocol, chain, last_processed_block, status, consecutive_failures, \
             last_sync_at, last_sync_duration_ms, avg_sync_duration_ms, last_error, last_error_at \
             FROM unified_sync_state WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else { return Ok(None) };
        let protocol: String = row.try_get("protocol").map_err(map_sqlx_error)?;
        let chain: String = row.try_get("chain").map_err(map_sqlx_error)?;

        Ok(Some(SyncState {
            instance_id: row.try_get("instance_id").map_err(map_sqlx_error)?,
            protocol: protocol.parse().unwrap_or(Protocol::Chainlink),
            chain: chain.parse().unwrap_or(Chain::Local),
            last_processed_block: row.try_get::<i64, _>("last_processed_block").map_err(map_sqlx_error)? as u64,
            status: parse_status(&row.try_get::<String, _>("status").map_err(map_sqlx_error)?),
            consecutive_failures: row.try_get::<i32, _>("consecutive_failures").map_err(map_sqlx_error)? as u32,
            last_sync_at: row.try_get("last_sync_at").map_err(map_sqlx_error)?,
            last_sync_duration_ms: row
                .try_get::<Option<i32>, _>("last_sync_duration_ms")
                .map_err(map_sqlx_error)?
                .map(|v| v as u32),
            avg_sync_duration_ms: row
                .try_get::<Option<i32>, _>("avg_sync_duration_ms")
                .map_err(map_sqlx_error)?
                .map(|v| v as u32),
            last_error: row.try_get("last_error").map_err(map_sqlx_error)?,
            last_error_at: row.try_get("last_error_at").map_err(map_sqlx_error)?,
        }))
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO unified_sync_state (instance_id, protocol, chain, last_processed_block, status, \
             consecutive_failures, last_sync_at, last_sync_duration_ms, avg_sync_duration_ms, last_error, \
             last_error_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (instance_id) DO UPDATE SET \
             last_processed_block = EXCLUDED.last_processed_block, status = EXCLUDED.status, \
             consecutive_failures = EXCLUDED.consecutive_failures, last_sync_at = EXCLUDED.last_sync_at, \
             last_sync_duration_ms = EXCLUDED.last_sync_duration_ms, \
             avg_sync_duration_ms = EXCLUDED.avg_sync_duration_ms, last_error = EXCLUDED.last_error, \
             last_error_at = EXCLUDED.last_error_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(&state.instance_id)
        .bind(state.protocol.as_str())
        .bind(state.chain.as_str())
        .bind(state.last_processed_block as i64)
        .bind(status_str(state.status))
        .bind(state.consecutive_failures as i32)
        .bind(state.last_sync_at)
        .bind(state.last_sync_duration_ms.map(|v| v as i32))
        .bind(state.avg_sync_duration_ms.map(|v| v as i32))
        .bind(&state.last_error)
        .bind(state.last_error_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_feeds(&self, filter: &FeedFilter) -> Result<Vec<PriceFeed>, PersistenceError> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT id, instance_id, protocol, chain, symbol, base_asset, quote_asset, price, price_raw, \
             decimals, timestamp, block_number, confidence, sources, is_stale, staleness_seconds, \
             tx_hash, log_index FROM unified_price_feeds WHERE 1=1",
        );
        if let Some(protocol) = &filter.protocol {
            qb.push(" AND protocol = ").push_bind(protocol.as_str());
        }
        if let Some(chain) = &filter.chain {
            qb.push(" AND chain = ").push_bind(chain.clone());
        }
        if let Some(symbol) = &filter.symbol {
            qb.push(" AND symbol = ").push_bind(symbol.clone());
        }
        if let Some(instance_id) = &filter.instance_id {
            qb.push(" AND instance_id = ").push_bind(instance_id.clone());
        }
        if let Some(is_stale) = filter.is_stale {
            qb.push(" AND is_stale = ").push_bind(is_stale);
        }
        qb.push(" ORDER BY timestamp DESC LIMIT 500");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        rows.iter().map(row_to_feed).collect()
    }

    async fn query_recent_feeds(&self, symbol: &str, window: chrono::Duration) -> Result<Vec<PriceFeed>, PersistenceError> {
        let cutoff: DateTime<Utc> = Utc::now() - window;
        let rows = sqlx::query(
            "SELECT id, instance_id, protocol, chain, symbol, base_asset, quote_asset, price, price_raw, \
             decimals, timestamp, block_number, confidence, sources, is_stale, staleness_seconds, \
             tx_hash, log_index FROM unified_price_feeds WHERE symbol = $1 AND timestamp >= $2 \
             ORDER BY timestamp DESC",
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_feed).collect()
    }

    /// Drops rows older than `retention_days` from both the feeds and
    /// updates tables (§4.4 `cleanup_old_data`).
    async fn cleanup_old_data(&self, retention_days: i64) -> Result<u64, PersistenceError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let feeds = sqlx::query("DELETE FROM unified_price_feeds WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let updates = sqlx::query("DELETE FROM unified_price_updates WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(feeds.rows_affected() + updates.rows_affected())
    }

    /// Latest row for the fingerprint by `last_seen_at`, open or resolved —
    /// `AlertEvaluator` reads the status to decide coalesce vs. reopen.
    async fn find_alert_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Alert>, PersistenceError> {
        let row = sqlx::query(
            "SELECT id, rule_id, fingerprint, event, severity, title, message, protocol, chain, \
             instance_id, symbol, context, status, acknowledged_by, acknowledged_at, resolved_by, \
             resolved_at, occurrences, first_seen_at, last_seen_at \
             FROM unified_alerts WHERE fingerprint = $1 ORDER BY last_seen_at DESC LIMIT 1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_alert).transpose()
    }

    /// Upsert on `id`: a coalesced occurrence keeps the same id and updates
    /// in place; a reopen mints a new id, landing a new row (§8 scenario 6).
    async fn save_alert(&self, alert: &Alert) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO unified_alerts (id, rule_id, fingerprint, event, severity, title, message, \
             protocol, chain, instance_id, symbol, context, status, acknowledged_by, acknowledged_at, \
             resolved_by, resolved_at, occurrences, first_seen_at, last_seen_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21) \
             ON CONFLICT (id) DO UPDATE SET \
             severity = EXCLUDED.severity, title = EXCLUDED.title, message = EXCLUDED.message, \
             context = EXCLUDED.context, status = EXCLUDED.status, \
             acknowledged_by = EXCLUDED.acknowledged_by, acknowledged_at = EXCLUDED.acknowledged_at, \
             resolved_by = EXCLUDED.resolved_by, resolved_at = EXCLUDED.resolved_at, \
             occurrences = EXCLUDED.occurrences, last_seen_at = EXCLUDED.last_seen_at, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(&alert.id)
        .bind(&alert.rule_id)
        .bind(&alert.fingerprint)
        .bind(alert.event.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.protocol.as_str())
        .bind(&alert.chain)
        .bind(&alert.instance_id)
        .bind(&alert.symbol)
        .bind(sqlx::types::Json(&alert.context))
        .bind(alert.status.as_str())
        .bind(&alert.acknowledged_by)
        .bind(alert.acknowledged_at)
        .bind(&alert.resolved_by)
        .bind(alert.resolved_at)
        .bind(alert.occurrences as i32)
        .bind(alert.first_seen_at)
        .bind(alert.last_seen_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn row_to_alert(row: &sqlx::postgres::PgRow) -> Result<Alert, PersistenceError> {
    let protocol: String = row.try_get("protocol").map_err(map_sqlx_error)?;
    let event: String = row.try_get("event").map_err(map_sqlx_error)?;
    let severity: String = row.try_get("severity").map_err(map_sqlx_error)?;
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let context: sqlx::types::Json<_> = row.try_get("context").map_err(map_sqlx_error)?;
    Ok(Alert {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        rule_id: row.try_get("rule_id").map_err(map_sqlx_error)?,
        fingerprint: row.try_get("fingerprint").map_err(map_sqlx_error)?,
        event: AlertEvent::from_str(&event).unwrap_or(AlertEvent::SyncError),
        severity: Severity::from_str(&severity).unwrap_or(Severity::Info),
        protocol: protocol.parse().unwrap_or(Protocol::Chainlink),
        chain: row.try_get("chain").map_err(map_sqlx_error)?,
        instance_id: row.try_get("instance_id").map_err(map_sqlx_error)?,
        symbol: row.try_get("symbol").map_err(map_sqlx_error)?,
        title: row.try_get("title").map_err(map_sqlx_error)?,
        message: row.try_get("message").map_err(map_sqlx_error)?,
        context: context.0,
        status: AlertStatus::from_str(&status).unwrap_or(AlertStatus::Open),
        occurrences: row.try_get::<i32, _>("occurrences").map_err(map_sqlx_error)? as u32,
        first_seen_at: row.try_get("first_seen_at").map_err(map_sqlx_error)?,
        last_seen_at: row.try_get("last_seen_at").map_err(map_sqlx_error)?,
        acknowledged_by: row.try_get("acknowledged_by").map_err(map_sqlx_error)?,
        acknowledged_at: row.try_get("acknowledged_at").map_err(map_sqlx_error)?,
        resolved_by: row.try_get("resolved_by").map_err(map_sqlx_error)?,
        resolved_at: row.try_get("resolved_at").map_err(map_sqlx_error)?,
    })
}

fn row_to_feed(row: &sqlx::postgres::PgRow) -> Result<PriceFeed, PersistenceError> {
    let protocol: String = row.try_get("protocol").map_err(map_sqlx_error)?;
    let chain: String = row.try_get("chain").map_err(map_sqlx_error)?;
    Ok(PriceFeed {
        feed_id: row.try_get("id").map_err(map_sqlx_error)?,
        instance_id: row.try_get("instance_id").map_err(map_sqlx_error)?,
        protocol: protocol.parse().unwrap_or(Protocol::Chainlink),
        chain: chain.parse().unwrap_or(Chain::Local),
        symbol: row.try_get("symbol").map_err(map_sqlx_error)?,
        base_asset: row.try_get("base_asset").map_err(map_sqlx_error)?,
        quote_asset: row.try_get("quote_asset").map_err(map_sqlx_error)?,
        price: row.try_get("price").map_err(map_sqlx_error)?,
        price_raw: row.try_get("price_raw").map_err(map_sqlx_error)?,
        decimals: row.try_get::<i16, _>("decimals").map_err(map_sqlx_error)? as u8,
        timestamp: row.try_get("timestamp").map_err(map_sqlx_error)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(map_sqlx_error)? as u64,
        confidence: row.try_get("confidence").map_err(map_sqlx_error)?,
        sources: row.try_get("sources").map_err(map_sqlx_error)?,
        is_stale: row.try_get("is_stale").map_err(map_sqlx_error)?,
        staleness_seconds: row.try_get::<i32, _>("staleness_seconds").map_err(map_sqlx_error)? as u32,
        tx_hash: row.try_get("tx_hash").map_err(map_sqlx_error)?,
        log_index: row.try_get("log_index").map_err(map_sqlx_error)?,
    })
}
