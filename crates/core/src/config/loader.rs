//! Instance catalog loader, in the shape of the reference's
//! `DeploymentLoader`: parse TOML, expand `${VAR}` placeholders, validate
//! `(protocol, chain)` compatibility, and produce a `Vec<ResolvedInstance>`.
//!
//! Instances that fail validation are skipped with a `ConfigError` and an
//! audit entry, never a hard startup failure (§7 propagation rules) — the
//! sole exception is a catalog that fails to parse at all, which surfaces
//! to the caller and prevents startup (orchestrator-level failure).

use super::instance::{is_supported_pair, ResolvedInstance};
use crate::error::ConfigError;
use crate::types::Instance;
use anyhow::{Context, Result};
use std::path::Path;

/// One instance that was dropped during load, with the reason, so callers
/// can emit the matching audit entry.
#[derive(Debug)]
pub struct SkippedInstance {
    pub instance_id: String,
    pub reason: ConfigError,
}

#[derive(Debug, Default)]
pub struct LoadedCatalog {
    pub instances: Vec<ResolvedInstance>,
    pub skipped: Vec<SkippedInstance>,
}

#[derive(Debug, serde::Deserialize)]
struct CatalogFile {
    #[serde(default)]
    instance: Vec<Instance>,
}

/// Expand `${VAR}` placeholders against the process environment. Unknown
/// variables are left untouched rather than erroring, matching the
/// reference's `expand_env` helper.
pub fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            let var_name = &after[..end];
            match std::env::var(var_name) {
                Ok(v) => out.push_str(&v),
                Err(_) => out.push_str(&format!("${{{var_name}}}")),
            }
            rest = &after[end + 1..];
        } else {
            out.push_str("${");
            rest = after;
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Load every `*.toml` file directly inside `dir` as instance catalog
/// fragments, merge them, and resolve+validate each row.
pub fn load_catalog_dir(dir: impl AsRef<Path>) -> Result<LoadedCatalog> {
    let dir = dir.as_ref();
    let mut raw = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading catalog directory {dir:?}"))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let content = std::fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
        let file: CatalogFile = toml::from_str(&content).with_context(|| format!("parsing {path:?}"))?;
        raw.extend(file.instance);
    }

    Ok(resolve_catalog(raw))
}

/// Resolve and validate a raw, already-parsed instance list. Exposed
/// separately from `load_catalog_dir` so tests and callers that source the
/// catalog from elsewhere (a config-manager collaborator, e.g.) can reuse
/// the same validation path.
pub fn resolve_catalog(raw: Vec<Instance>) -> LoadedCatalog {
    let mut catalog = LoadedCatalog::default();

    for mut instance in raw {
        if !instance.enabled {
            continue;
        }
        instance.rpc_url = expand_env(&instance.rpc_url);

        if instance.rpc_url.trim().is_empty() {
            catalog.skipped.push(SkippedInstance {
                instance_id: instance.instance_id.clone(),
                reason: ConfigError::MissingRpcUrl { instance_id: instance.instance_id.clone() },
            });
            continue;
        }

        if !is_supported_pair(instance.protocol, &instance.chain) {
            catalog.skipped.push(SkippedInstance {
                instance_id: instance.instance_id.clone(),
                reason: ConfigError::UnsupportedPair { protocol: instance.protocol, chain: instance.chain.clone() },
            });
            continue;
        }

        catalog.instances.push(ResolvedInstance::resolve(&instance));
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chain, Protocol};

    fn instance(id: &str, protocol: Protocol, chain: Chain, enabled: bool, rpc: &str) -> Instance {
        Instance {
            instance_id: id.to_string(),
            protocol,
            chain,
            enabled,
            rpc_url: rpc.to_string(),
            protocol_config: Default::default(),
            sync_interval_ms: None,
        }
    }

    #[test]
    fn expands_known_env_var() {
        std::env::set_var("ORACLE_TEST_RPC", "https://resolved.example");
        assert_eq!(expand_env("${ORACLE_TEST_RPC}/v1"), "https://resolved.example/v1");
        std::env::remove_var("ORACLE_TEST_RPC");
    }

    #[test]
    fn leaves_unknown_env_var_untouched() {
        assert_eq!(expand_env("${DEFINITELY_NOT_SET_XYZ}"), "${DEFINITELY_NOT_SET_XYZ}");
    }

    #[test]
    fn disabled_instances_are_dropped_silently() {
        let raw = vec![instance("a", Protocol::Chainlink, Chain::Ethereum, false, "https://x")];
        let catalog = resolve_catalog(raw);
        assert!(catalog.instances.is_empty());
        assert!(catalog.skipped.is_empty());
    }

    #[test]
    fn unsupported_pair_is_skipped_with_reason() {
        let raw = vec![instance("a", Protocol::Chainlink, Chain::Solana, true, "https://x")];
        let catalog = resolve_catalog(raw);
        assert!(catalog.instances.is_empty());
        assert_eq!(catalog.skipped.len(), 1);
        assert!(matches!(catalog.skipped[0].reason, ConfigError::UnsupportedPair { .. }));
    }

    #[test]
    fn missing_rpc_url_is_skipped() {
        let raw = vec![instance("a", Protocol::Pyth, Chain::Ethereum, true, "")];
        let catalog = resolve_catalog(raw);
        assert!(catalog.instances.is_empty());
        assert_eq!(catalog.skipped.len(), 1);
        assert!(matches!(catalog.skipped[0].reason, ConfigError::MissingRpcUrl { .. }));
    }

    #[test]
    fn valid_instance_is_resolved() {
        let raw = vec![instance("ci-eth-main", Protocol::Chainlink, Chain::Ethereum, true, "https://rpc")];
        let catalog = resolve_catalog(raw);
        assert_eq!(catalog.instances.len(), 1);
        assert_eq!(catalog.instances[0].instance_id, "ci-eth-main");
    }
}
