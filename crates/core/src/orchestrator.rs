//! Discovers enabled instances, starts/stops `SyncInstance` tasks, and
//! rolls up health across all of them (C5, §4.5).

use crate::audit::AuditBuffer;
use crate::config::instance::ResolvedInstance;
use crate::sync::SyncInstance;
use crate::traits::{OracleClient, PersistenceGateway};
use crate::types::{ActorType, AuditEntry, Severity, SyncState, SyncStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Builds the `OracleClient` for one resolved instance. Implemented by the
/// binary's wiring code, which knows how to dispatch on `instance.protocol`
/// to `oracle-chain`'s or `oracle-api`'s concrete clients — keeping this
/// crate free of any dependency on `alloy` or `reqwest`.
pub trait ClientFactory: Send + Sync {
    fn build(&self, instance: &ResolvedInstance) -> anyhow::Result<Arc<dyn OracleClient>>;
}

struct RunningInstance {
    sync: Arc<SyncInstance>,
    handle: JoinHandle<()>,
}

/// Roll-up produced by `health_check_all` (§4.5, §10.5 health snapshot).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OrchestratorHealth {
    pub total: usize,
    pub healthy: usize,
    pub lagging: usize,
    pub stalled: usize,
    pub error: usize,
    pub worst_staleness_seconds: u32,
    pub by_protocol: HashMap<String, usize>,
}

/// Discovers enabled instances from a catalog, starts one `SyncInstance`
/// per row, and aggregates health. Failure to start one instance never
/// aborts the others (§4.5 failure isolation).
pub struct SyncOrchestrator {
    gateway: Arc<dyn PersistenceGateway>,
    audit: Arc<AuditBuffer>,
    factory: Arc<dyn ClientFactory>,
    running: parking_lot::Mutex<HashMap<String, RunningInstance>>,
}

impl SyncOrchestrator {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        audit: Arc<AuditBuffer>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            gateway,
            audit,
            factory,
            running: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Start one `SyncInstance` per enabled, resolved instance. A failing
    /// `start` is logged and audited but does not abort the others.
    pub async fn start_all(&self, instances: Vec<ResolvedInstance>) {
        for instance in instances {
            if let Err(err) = self.start(instance.clone()).await {
                error!(instance_id = %instance.instance_id, error = %err, "failed to start sync instance");
                self.audit.log(AuditEntry {
                    id: crate::audit::generate_audit_id(),
                    timestamp: Utc::now(),
                    actor: "orchestrator".to_string(),
                    actor_type: ActorType::System,
                    action: "orchestrator.instance.start_failed".to_string(),
                    severity: Severity::Critical,
                    entity_type: Some("instance".to_string()),
                    entity_id: Some(instance.instance_id.clone()),
                    details: Default::default(),
                    success: false,
                    error_message: Some(err.to_string()),
                });
            }
        }
    }

    pub async fn start(&self, instance: ResolvedInstance) -> anyhow::Result<()> {
        let instance_id = instance.instance_id.clone();
        let client = self.factory.build(&instance)?;
        let sync = Arc::new(SyncInstance::new(instance, client, self.gateway.clone(), self.audit.clone()));

        let task_handle = sync.clone();
        let handle = tokio::spawn(async move { task_handle.run().await });

        self.running.lock().insert(instance_id.clone(), RunningInstance { sync, handle });
        info!(instance_id = %instance_id, "sync instance started");
        Ok(())
    }

    pub fn active_sync_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Signal every running instance to stop and wait for exit, bounded by
    /// a 30s deadline (§5 cancellation & timeouts).
    pub async fn stop_all(&self) {
        let running: Vec<RunningInstance> = {
            let mut guard = self.running.lock();
            guard.drain().map(|(_, v)| v).collect()
        };

        for r in &running {
            r.sync.shutdown_handle().notify_one();
        }

        let deadline = tokio::time::Duration::from_secs(30);
        let shutdown = tokio::time::timeout(deadline, async {
            for r in running {
                let _ = r.handle.await;
            }
        })
        .await;

        if shutdown.is_err() {
            warn!("stop_all exceeded 30s deadline; some instances may still be exiting");
        }
    }

    /// Roll up `SyncState` across all known instances plus each client's
    /// own `health_check` (§4.5).
    pub async fn health_check_all(&self) -> OrchestratorHealth {
        let mut health = OrchestratorHealth::default();
        let instance_ids: Vec<String> = self.running.lock().keys().cloned().collect();

        for instance_id in instance_ids {
            let state = self.gateway.read_sync_state(&instance_id).await.ok().flatten();
            let Some(state) = state else { continue };

            health.total += 1;
            match state.status {
                SyncStatus::Healthy => health.healthy += 1,
                SyncStatus::Lagging => health.lagging += 1,
                SyncStatus::Stalled => health.stalled += 1,
                SyncStatus::Error => health.error += 1,
            }
            *health.by_protocol.entry(state.protocol.as_str().to_string()).or_insert(0) += 1;
        }

        health
    }
}
