//! Protocol-agnostic core of the oracle aggregation engine.
//!
//! This crate holds every piece of the engine that has no business knowing
//! about RPC transports, HTTP clients, or SQL: domain types, the sync and
//! orchestration state machines, aggregation statistics, alert evaluation,
//! the audit log, and configuration. `oracle-chain`, `oracle-api`, and
//! `oracle-db` each implement the trait seams declared in `traits` against
//! their own collaborator (alloy, reqwest, sqlx).

pub mod aggregator;
pub mod alert;
pub mod audit;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod incident;
pub mod orchestrator;
pub mod retry;
pub mod rules;
pub mod sync;
pub mod symbol;
pub mod traits;
pub mod types;

pub use aggregator::{aggregate_symbol, correlation_matrix, most_reliable_chain, pearson_correlation, ChainPrice, Deviation, Recommendation, SymbolAggregate};
pub use alert::{AlertEvaluator, AlertStore, DeviationInput, EmitOutcome, EvaluationContext};
pub use audit::{generate_audit_id, AuditBuffer, AuditFilter, AuditStatistics, ExportFormat};
pub use config::{config, init_config, AppConfig};
pub use incident::KvIncidentBackend;
pub use orchestrator::{ClientFactory, OrchestratorHealth, SyncOrchestrator};
pub use rules::KvRuleBackend;
pub use sync::{sync_fingerprint, SyncInstance, TickOutcome};
pub use traits::{
    config_error_action, AuditSink, FeedFilter, IncidentBackend, KvStore, NotificationPayload,
    NotificationSender, OracleClient, PersistenceGateway, RuleBackend,
};
pub use types::*;
