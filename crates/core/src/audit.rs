//! Capped circular-buffer audit log with asynchronous, retry-with-backoff
//! persistence (C8, §4.8). Process-wide singleton — one `AuditBuffer` per
//! binary, constructed at startup and drained at shutdown (§9).

use crate::traits::AuditSink;
use crate::types::{ActorType, AuditEntry, Severity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, warn};

/// Fixed-capacity slot array used as a circular buffer: `log` overwrites
/// the oldest entry once full, in O(1).
struct Ring {
    slots: Vec<Option<AuditEntry>>,
    next: usize,
    len: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity], next: 0, len: 0 }
    }

    fn push(&mut self, entry: AuditEntry) {
        let capacity = self.slots.len();
        self.slots[self.next] = Some(entry);
        self.next = (self.next + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    fn iter(&self) -> impl Iterator<Item = &AuditEntry> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Vec<String>,
    pub actor: Option<String>,
    pub severity: Option<Severity>,
    pub success: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub instance_id: Option<String>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if !self.action.is_empty() && !self.action.iter().any(|a| a == &entry.action) {
            return false;
        }
        if let Some(actor) = &self.actor {
            if actor != &entry.actor {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if severity != entry.severity {
                return false;
            }
        }
        if let Some(success) = self.success {
            if success != entry.success {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(instance_id) = &self.instance_id {
            if entry.entity_id.as_deref() != Some(instance_id.as_str()) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let haystack = format!("{} {}", entry.action, entry.actor);
            if !haystack.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditStatistics {
    pub total: usize,
    pub by_severity: std::collections::HashMap<String, usize>,
    pub success_count: usize,
    pub failure_count: usize,
}

pub enum ExportFormat {
    Json,
    Csv,
}

/// `"audit-" + ms_base36 + "-" + 10-hex-of-crypto-random` (§4.8).
pub fn generate_audit_id() -> String {
    let ms = Utc::now().timestamp_millis().max(0) as u64;
    let mut bytes = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("audit-{}-{}", to_base36(ms), &hex[..10])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

pub struct AuditBuffer {
    ring: Mutex<Ring>,
    queue: Mutex<VecDeque<AuditEntry>>,
    queue_capacity: usize,
    flush_batch_size: usize,
    flush_debounce: Duration,
    last_log_at_ms: AtomicI64,
    notify: Notify,
}

impl AuditBuffer {
    pub fn new(ring_capacity: usize, queue_capacity: usize, flush_batch_size: usize, flush_debounce: Duration) -> Self {
        Self {
            ring: Mutex::new(Ring::new(ring_capacity)),
            queue: Mutex::new(VecDeque::with_capacity(queue_capacity)),
            queue_capacity,
            flush_batch_size,
            flush_debounce,
            last_log_at_ms: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }

    /// Synchronous, non-blocking: append to the ring (O(1), overwrite
    /// oldest if full) and to the bounded persistence queue.
    pub fn log(&self, entry: AuditEntry) {
        self.ring.lock().push(entry.clone());

        let mut queue = self.queue.lock();
        queue.push_back(entry);
        if queue.len() > self.queue_capacity {
            let drop_count = (self.queue_capacity / 5).max(1);
            for _ in 0..drop_count {
                queue.pop_front();
            }
            drop(queue);
            warn!(dropped = drop_count, "audit persistence queue overflowed; dropped oldest 20%");
            self.ring.lock().push(AuditEntry {
                id: generate_audit_id(),
                timestamp: Utc::now(),
                actor: "audit-buffer".to_string(),
                actor_type: ActorType::System,
                action: "audit.queue.overflow".to_string(),
                severity: Severity::Warning,
                entity_type: None,
                entity_id: None,
                details: Default::default(),
                success: false,
                error_message: Some(format!("dropped {drop_count} oldest entries")),
            });
        }

        self.last_log_at_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Convenience constructor for a successful/failed audit entry.
    pub fn log_action(&self, actor: &str, actor_type: ActorType, action: &str, severity: Severity, success: bool, error_message: Option<String>) {
        self.log(AuditEntry {
            id: generate_audit_id(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            actor_type,
            action: action.to_string(),
            severity,
            entity_type: None,
            entity_id: None,
            details: Default::default(),
            success,
            error_message,
        });
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn query(&self, filter: &AuditFilter, limit: usize, offset: usize) -> Vec<AuditEntry> {
        let ring = self.ring.lock();
        let mut matches: Vec<AuditEntry> = ring.iter().filter(|e| filter.matches(e)).cloned().collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matches.into_iter().skip(offset).take(limit).collect()
    }

    pub fn statistics(&self, filter: &AuditFilter) -> AuditStatistics {
        let ring = self.ring.lock();
        let mut stats = AuditStatistics::default();
        for entry in ring.iter().filter(|e| filter.matches(e)) {
            stats.total += 1;
            if entry.success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
            *stats.by_severity.entry(format!("{:?}", entry.severity)).or_insert(0) += 1;
        }
        stats
    }

    pub fn export(&self, format: ExportFormat) -> String {
        let ring = self.ring.lock();
        let mut entries: Vec<&AuditEntry> = ring.iter().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&entries).unwrap_or_default(),
            ExportFormat::Csv => {
                let mut out = String::from("id,timestamp,actor,action,severity,success\n");
                for e in entries {
                    out.push_str(&format!(
                        "{},{},{},{},{:?},{}\n",
                        e.id, e.timestamp, e.actor, e.action, e.severity, e.success
                    ));
                }
                out
            }
        }
    }

    /// Drop ring entries older than `days`.
    pub fn clear_old(&self, days: i64) {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut ring = self.ring.lock();
        let capacity = ring.slots.len();
        let retained: Vec<AuditEntry> = ring.iter().filter(|e| e.timestamp >= cutoff).cloned().collect();
        *ring = Ring::new(capacity);
        for entry in retained {
            ring.push(entry);
        }
    }

    /// Drain up to `flush_batch_size` entries from the persistence queue.
    fn drain_batch(&self) -> Vec<AuditEntry> {
        let mut queue = self.queue.lock();
        let n = self.flush_batch_size.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Debounced flush loop: wait for a `log()` notification, then wait out
    /// the quiet period before dequeuing and persisting a batch. On
    /// final failure the batch is dropped (never re-enqueued) to bound
    /// queue growth, per §4.8.
    pub async fn run_flusher(self: Arc<Self>, sink: Arc<dyn AuditSink>, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.notified() => break,
            }

            loop {
                tokio::time::sleep(self.flush_debounce).await;
                let elapsed = Utc::now().timestamp_millis() - self.last_log_at_ms.load(Ordering::SeqCst);
                if elapsed >= self.flush_debounce.as_millis() as i64 {
                    break;
                }
            }

            self.flush_once(sink.as_ref()).await;

            if self.queue_len() == 0 {
                continue;
            }
        }
    }

    /// Persist one batch with up to 3 linear-backoff retries; drop on
    /// final failure (never re-enqueued, §4.8).
    pub async fn flush_once(&self, sink: &dyn AuditSink) {
        let batch = self.drain_batch();
        if batch.is_empty() {
            return;
        }

        let mut attempt = 1u32;
        loop {
            match sink.persist_batch(&batch).await {
                Ok(()) => return,
                Err(err) if attempt < 3 => {
                    warn!(attempt, error = %err, "audit batch persist failed, retrying");
                    tokio::time::sleep(Duration::from_millis(1000 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(error = %err, batch_size = batch.len(), "audit batch persist failed after retries, dropping batch");
                    return;
                }
            }
        }
    }

    /// Drain the queue with a bounded deadline at shutdown (§9).
    pub async fn drain_on_shutdown(&self, sink: &dyn AuditSink, deadline: Duration) {
        let start = tokio::time::Instant::now();
        while self.queue_len() > 0 && start.elapsed() < deadline {
            self.flush_once(sink).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: &str, severity: Severity, success: bool) -> AuditEntry {
        AuditEntry {
            id: generate_audit_id(),
            timestamp: Utc::now(),
            actor: "tester".to_string(),
            actor_type: ActorType::System,
            action: action.to_string(),
            severity,
            entity_type: None,
            entity_id: None,
            details: Default::default(),
            success,
            error_message: None,
        }
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let buffer = AuditBuffer::new(3, 100, 10, Duration::from_millis(1));
        for i in 0..5 {
            buffer.log(entry(&format!("action-{i}"), Severity::Info, true));
        }
        assert_eq!(buffer.len(), 3);
        let all = buffer.query(&AuditFilter::default(), 10, 0);
        let actions: Vec<&str> = all.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"action-4"));
        assert!(!actions.contains(&"action-0"));
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let buffer = AuditBuffer::new(10_000, 20_000, 100, Duration::from_millis(1));
        for i in 0..15_000 {
            buffer.log(entry(&format!("a{i}"), Severity::Info, true));
        }
        assert!(buffer.len() <= 10_000);
    }

    #[test]
    fn queue_overflow_drops_oldest_20_percent() {
        let buffer = AuditBuffer::new(10_000, 10, 100, Duration::from_millis(1));
        for i in 0..15 {
            buffer.log(entry(&format!("a{i}"), Severity::Info, true));
        }
        assert!(buffer.queue_len() <= 10);
    }

    #[test]
    fn query_sorts_descending_and_paginates() {
        let buffer = AuditBuffer::new(100, 100, 10, Duration::from_millis(1));
        for i in 0..5 {
            buffer.log(entry(&format!("a{i}"), Severity::Info, true));
            std::thread::sleep(Duration::from_millis(2));
        }
        let page = buffer.query(&AuditFilter::default(), 2, 0);
        assert_eq!(page.len(), 2);
        assert!(page[0].timestamp >= page[1].timestamp);
    }

    #[test]
    fn filter_by_severity_and_success() {
        let buffer = AuditBuffer::new(100, 100, 10, Duration::from_millis(1));
        buffer.log(entry("ok", Severity::Info, true));
        buffer.log(entry("bad", Severity::Critical, false));

        let filter = AuditFilter { severity: Some(Severity::Critical), ..Default::default() };
        let results = buffer.query(&filter, 10, 0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].action, "bad");
    }

    #[test]
    fn audit_id_has_expected_shape() {
        let id = generate_audit_id();
        assert!(id.starts_with("audit-"));
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 10);
    }

    struct FailingSink;
    #[async_trait::async_trait]
    impl AuditSink for FailingSink {
        async fn persist_batch(&self, _entries: &[AuditEntry]) -> Result<(), crate::error::UpstreamError> {
            Err(crate::error::UpstreamError::Transient("down".into()))
        }
    }

    #[tokio::test]
    async fn flush_drops_batch_after_exhausting_retries() {
        let buffer = AuditBuffer::new(100, 100, 10, Duration::from_millis(1));
        buffer.log(entry("a", Severity::Info, true));
        let sink = FailingSink;
        buffer.flush_once(&sink).await;
        assert_eq!(buffer.queue_len(), 0, "batch should be dropped, not re-enqueued");
    }
}
