//! Cross-alert incident tracking, persisted as a single versioned blob
//! (`incidents/v1`) over `KvStore` (C9, §4.9).

use crate::error::PersistenceError;
use crate::traits::{IncidentBackend, KvStore};
use crate::types::Incident;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const INCIDENTS_KEY: &str = "incidents/v1";

#[derive(Debug, Serialize, Deserialize, Default)]
struct IncidentBlob {
    version: u32,
    next_id: u32,
    items: Vec<Incident>,
}

/// Generic `IncidentBackend` over any `KvStore`. Unknown fields in a stored
/// blob are dropped on the next `save` (serde strips them on deserialize);
/// malformed items are discarded rather than failing the whole load, since
/// one corrupt incident shouldn't take the rest of the log down with it.
pub struct KvIncidentBackend {
    store: Arc<dyn KvStore>,
}

impl KvIncidentBackend {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Next id to assign, derived from the current max rather than stored
    /// counter drift.
    pub async fn next_id(&self) -> Result<u32, PersistenceError> {
        let blob = self.load_blob().await?;
        Ok(blob.items.iter().map(|i| i.id).max().map(|m| m + 1).unwrap_or(1))
    }

    async fn load_blob(&self) -> Result<IncidentBlob, PersistenceError> {
        match self.store.get(INCIDENTS_KEY).await? {
            None => Ok(IncidentBlob { version: 1, next_id: 1, items: vec![] }),
            Some(bytes) => match serde_json::from_slice::<IncidentBlob>(&bytes) {
                Ok(blob) => Ok(blob),
                Err(err) => {
                    warn!(error = %err, "incidents/v1 blob failed to parse; treating as empty");
                    Ok(IncidentBlob { version: 1, next_id: 1, items: vec![] })
                }
            },
        }
    }
}

#[async_trait]
impl IncidentBackend for KvIncidentBackend {
    async fn load(&self) -> Result<Vec<Incident>, PersistenceError> {
        Ok(self.load_blob().await?.items)
    }

    async fn save(&self, incidents: &[Incident]) -> Result<(), PersistenceError> {
        let next_id = incidents.iter().map(|i| i.id).max().map(|m| m + 1).unwrap_or(1);
        let blob = IncidentBlob { version: 1, next_id, items: incidents.to_vec() };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| PersistenceError::Other(format!("failed to serialize incidents/v1: {e}")))?;
        self.store.put(INCIDENTS_KEY, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IncidentStatus, Severity};
    use chrono::Utc;
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

    fn incident(id: u32) -> Incident {
        Incident {
            id,
            title: format!("incident-{id}"),
            status: IncidentStatus::Open,
            severity: Severity::Warning,
            owner: None,
            root_cause: None,
            summary: None,
            alert_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn empty_store_loads_empty_vec() {
        let backend = KvIncidentBackend::new(Arc::new(InMemoryKv::default()));
        assert!(backend.load().await.unwrap().is_empty());
        assert_eq!(backend.next_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn round_trips_incidents_and_advances_next_id() {
        let backend = KvIncidentBackend::new(Arc::new(InMemoryKv::default()));
        backend.save(&[incident(1), incident(2)]).await.unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(backend.next_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_blob_is_treated_as_empty_not_an_error() {
        let kv = Arc::new(InMemoryKv::default());
        kv.put(INCIDENTS_KEY, b"not json".to_vec()).await.unwrap();
        let backend = KvIncidentBackend::new(kv);
        assert!(backend.load().await.unwrap().is_empty());
    }
}
