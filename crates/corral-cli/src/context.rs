//! Shared command context: configuration plus an open claim store.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use corral_core::{ClaimStore, KernelConfig, SqliteClaimStore, SystemClock};
use tracing::debug;

/// Everything a command needs to talk to the kernel.
pub struct CliContext {
    /// Effective configuration after CLI overrides.
    pub config: KernelConfig,
    store: Arc<SqliteClaimStore>,
}

impl CliContext {
    /// Loads the config file (missing file means defaults), applies CLI
    /// overrides, and opens the store.
    pub fn load(
        config_path: &Path,
        project: Option<&str>,
        store_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config = if config_path.exists() {
            KernelConfig::from_file(config_path)
                .with_context(|| format!("reading {}", config_path.display()))?
        } else {
            debug!(path = %config_path.display(), "no config file; using defaults");
            KernelConfig::default()
        };
        if let Some(project) = project {
            config.project = project.to_string();
        }
        if let Some(path) = store_path {
            config.store_path = path.to_path_buf();
        }

        let store = SqliteClaimStore::open(&config.store_path, Arc::new(SystemClock))
            .with_context(|| format!("opening claim store {}", config.store_path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// The shared claim store handle.
    pub fn store(&self) -> Arc<dyn ClaimStore> {
        self.store.clone()
    }
}
