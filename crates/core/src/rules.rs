//! Alert rule storage over `KvStore` at `alert_rules/v1`, with validation
//! and defaulting on load (§4.7, §7 `ValidationError`).

use crate::audit::AuditBuffer;
use crate::error::{PersistenceError, ValidationError};
use crate::traits::{KvStore, RuleBackend};
use crate::types::{ActorType, AlertEvent, AlertRule, NotificationChannel, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const RULES_KEY: &str = "alert_rules/v1";

#[derive(Debug, Serialize, Deserialize, Default)]
struct RuleBlob {
    version: u32,
    items: Vec<AlertRule>,
}

/// Generic `RuleBackend` over any `KvStore`. Rules that fail validation are
/// dropped on load, never surfaced as a load-level error.
pub struct KvRuleBackend {
    store: Arc<dyn KvStore>,
    audit: Arc<AuditBuffer>,
}

impl KvRuleBackend {
    pub fn new(store: Arc<dyn KvStore>, audit: Arc<AuditBuffer>) -> Self {
        Self { store, audit }
    }

    pub async fn save(&self, rules: &[AlertRule]) -> Result<(), PersistenceError> {
        let blob = RuleBlob { version: 1, items: rules.to_vec() };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| PersistenceError::Other(format!("failed to serialize alert_rules/v1: {e}")))?;
        self.store.put(RULES_KEY, bytes).await
    }
}

#[async_trait]
impl RuleBackend for KvRuleBackend {
    async fn load(&self) -> Result<Vec<AlertRule>, PersistenceError> {
        let blob = match self.store.get(RULES_KEY).await? {
            None => return Ok(vec![]),
            Some(bytes) => match serde_json::from_slice::<RuleBlob>(&bytes) {
                Ok(blob) => blob,
                Err(err) => {
                    warn!(error = %err, "alert_rules/v1 blob failed to parse; treating as empty");
                    return Ok(vec![]);
                }
            },
        };

        Ok(blob
            .items
            .into_iter()
            .filter_map(|rule| match validate_and_normalize(rule) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    self.audit.log_action(
                        "rule-loader",
                        ActorType::System,
                        "alert_rule.validation_failed",
                        Severity::Warning,
                        false,
                        Some(err.to_string()),
                    );
                    None
                }
            })
            .collect())
    }
}

/// Applies the defaulting rules from §4.7 and rejects structurally invalid
/// entries (negative cooldown, empty channel list with a non-silenced rule).
fn validate_and_normalize(mut rule: AlertRule) -> Result<AlertRule, ValidationError> {
    if rule.name.trim().is_empty() {
        return Err(ValidationError::InvalidParams {
            rule_id: rule.id.clone(),
            reason: "name must not be empty".to_string(),
        });
    }
    if !matches_known_event(rule.event) {
        return Err(ValidationError::UnknownEvent { rule_id: rule.id.clone(), event: format!("{:?}", rule.event) });
    }

    if rule.cooldown_minutes == 0 {
        rule.cooldown_minutes = 15;
    }
    if rule.max_notifications_per_hour == 0 {
        rule.max_notifications_per_hour = 4;
    }
    if rule.channels.is_empty() {
        rule.channels = vec![NotificationChannel::Webhook];
    }

    Ok(rule)
}

fn matches_known_event(_event: AlertEvent) -> bool {
    // `AlertEvent` is a closed enum so any successfully-deserialized value
    // is by definition known; this stays as an explicit seam for future
    // per-event structural checks (e.g. required params keys).
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct InMemoryKv {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl KvStore for InMemoryKv {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
            Ok(self.data.lock().get(key).cloned())
        }
        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError> {
            self.data.lock().insert(key.to_string(), value);
            Ok(())
        }
    }

    fn bare_rule(id: &str, name: &str) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            event: AlertEvent::PriceDeviation,
            severity: Severity::Warning,
            protocols: vec![],
            chains: vec![],
            instances: vec![],
            symbols: vec![],
            params: HashMap::new(),
            channels: vec![],
            cooldown_minutes: 0,
            max_notifications_per_hour: 0,
            silenced_until: None,
        }
    }

    #[tokio::test]
    async fn defaults_are_applied_on_load() {
        let kv = Arc::new(InMemoryKv::default());
        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let backend = KvRuleBackend::new(kv, audit);
        backend.save(&[bare_rule("r1", "deviation")]).await.unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].cooldown_minutes, 15);
        assert_eq!(loaded[0].max_notifications_per_hour, 4);
        assert_eq!(loaded[0].channels, vec![NotificationChannel::Webhook]);
    }

    #[tokio::test]
    async fn nameless_rule_is_dropped_and_audited() {
        let kv = Arc::new(InMemoryKv::default());
        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let backend = KvRuleBackend::new(kv, audit.clone());
        backend.save(&[bare_rule("r1", "")]).await.unwrap();

        let loaded = backend.load().await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn empty_store_loads_empty_vec() {
        let kv = Arc::new(InMemoryKv::default());
        let audit = Arc::new(AuditBuffer::new(100, 100, 10, std::time::Duration::from_millis(1)));
        let backend = KvRuleBackend::new(kv, audit);
        assert!(backend.load().await.unwrap().is_empty());
    }
}
