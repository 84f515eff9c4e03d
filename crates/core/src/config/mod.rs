//! Layered configuration: compile-time protocol defaults, a TOML-backed
//! `AppConfig` with environment/testing/production profiles, and the
//! instance-catalog loader.

pub mod app;
pub mod defaults;
pub mod instance;
pub mod loader;

pub use app::{config, init_config, AppConfig};
pub use defaults::{
    defaults_for, ProtocolDefaults, CONSECUTIVE_FAILURE_THRESHOLD, DEFAULT_RETENTION_DAYS,
    DEFAULT_STALENESS_THRESHOLD_SECS,
};
pub use instance::{is_supported_pair, ResolvedInstance};
pub use loader::{expand_env, load_catalog_dir, resolve_catalog, LoadedCatalog, SkippedInstance};
