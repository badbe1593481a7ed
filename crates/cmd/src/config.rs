//! Command-line configuration
//!
//! ```yaml
//! ledger:
//!   url: s3://ops-bucket/reorg-ledger
//!   region: us-west-2
//! stores:
//!   archive:
//!     url: s3://archive
//!   staging:
//!     url: file:///srv/staging
//! workers: 8
//! ```
//!
//! Trigger and message paths name a location (`s3://archive/logs`); each
//! location must appear under `stores`.

use anyhow::{Context, Result};
use ledger::{CompletionTracker, MemoryOrchestrator, ObjectStoreLedger, TaskLedger};
use reorg::{ObjectStores, StoreConfig, build_object_store};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_ENV: &str = "REORG_CONFIG";

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct ReorgConfig {
    /// Where ledger rows are kept; a key prefix in the URL is honoured
    pub ledger: StoreConfig,

    /// Data stores by location name
    pub stores: BTreeMap<String, StoreConfig>,

    /// Concurrent migration workers for `scan`
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub scanner_function: Option<String>,

    #[serde(default)]
    pub worker_function: Option<String>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// Everything a command needs, built once from the config
pub struct Runtime {
    pub stores: ObjectStores,
    pub ledger: Arc<dyn TaskLedger>,
    pub orchestrator: MemoryOrchestrator,
}

impl Runtime {
    pub fn tracker(&self) -> CompletionTracker {
        CompletionTracker::new(self.ledger.clone(), Arc::new(self.orchestrator.clone()))
    }
}

/// Load configuration from YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReorgConfig> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ReorgConfig> {
    let config: ReorgConfig =
        serde_yaml_ng::from_str(content).with_context(|| "Failed to parse YAML configuration")?;
    validate_config(&config)?;
    Ok(config)
}

pub(crate) fn validate_config(config: &ReorgConfig) -> Result<()> {
    if config.stores.is_empty() {
        anyhow::bail!("At least one store must be configured");
    }
    if config.workers == 0 {
        anyhow::bail!("workers must be greater than 0");
    }
    for (name, store) in &config.stores {
        if name.is_empty() || name.contains('/') {
            anyhow::bail!("Invalid store location name '{}'", name);
        }
        // Object keys in messages are relative to the store root
        let prefix = store
            .prefix()
            .with_context(|| format!("Invalid URL for store '{}'", name))?;
        if !prefix.as_ref().is_empty() {
            anyhow::bail!(
                "Store '{}' must name a bucket root, not a prefix: {}",
                name,
                store.url
            );
        }
    }
    let _ = config
        .ledger
        .prefix()
        .with_context(|| "Invalid ledger URL")?;
    Ok(())
}

impl ReorgConfig {
    pub fn open(&self) -> Result<Runtime> {
        let mut stores = ObjectStores::new();
        for (name, store) in &self.stores {
            let built = build_object_store(store)
                .with_context(|| format!("Failed to open store '{}'", name))?;
            stores.insert(name.clone(), built);
        }

        let ledger_store =
            build_object_store(&self.ledger).with_context(|| "Failed to open ledger store")?;
        let ledger = ObjectStoreLedger::new(ledger_store, self.ledger.prefix()?);

        Ok(Runtime {
            stores,
            ledger: Arc::new(ledger),
            orchestrator: MemoryOrchestrator::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_with_defaults() -> Result<()> {
        let config = parse_config(
            r#"
ledger:
  url: s3://ops/reorg-ledger
  region: us-west-2
stores:
  archive:
    url: s3://archive
    endpoint: http://localhost:9000
  scratch:
    url: memory://
"#,
        )?;
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.ledger.prefix()?.as_ref(), "reorg-ledger");
        assert_eq!(config.ledger.region, "us-west-2");
        assert_eq!(
            config.stores.keys().collect::<Vec<_>>(),
            vec!["archive", "scratch"]
        );
        assert_eq!(config.stores["archive"].endpoint, "http://localhost:9000");
        assert!(config.scanner_function.is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_bad_configs() {
        let no_stores = "ledger:\n  url: memory://\nstores: {}\n";
        assert!(parse_config(no_stores).is_err());

        let no_workers = "ledger:\n  url: memory://\nstores:\n  a:\n    url: memory://\nworkers: 0\n";
        assert!(parse_config(no_workers).is_err());

        let prefixed = "ledger:\n  url: memory://\nstores:\n  a:\n    url: s3://bucket/logs\n";
        let err = parse_config(prefixed).unwrap_err();
        assert!(err.to_string().contains("bucket root"), "{err}");

        assert!(parse_config("stores: [").is_err());
    }

    #[tokio::test]
    async fn test_open_builds_every_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let yaml = format!(
            "ledger:\n  url: {}\nstores:\n  a:\n    url: memory://\n  b:\n    url: {}\n",
            dir.path().join("ledger").display(),
            dir.path().join("b").display(),
        );
        let runtime = parse_config(&yaml)?.open()?;
        assert_eq!(runtime.stores.locations(), vec!["a", "b"]);
        assert!(dir.path().join("b").is_dir());
        assert!(runtime.ledger.list_execution("nothing").await?.is_empty());
        Ok(())
    }
}
