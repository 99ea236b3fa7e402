use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use repute_store::{InMemoryReputationStore, ReputationStore, SledReputationStore};
use serde::Deserialize;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_MAX_PROPAGATION_DEPTH: usize = 64;

/// Engine configuration, usually loaded from TOML.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on nested propagation hops for a single write.
    pub max_propagation_depth: usize,

    pub store: StoreConfig,

    /// Optional log level string (e.g., "info", "debug", "repute_engine=trace").
    pub log_level: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_propagation_depth: DEFAULT_MAX_PROPAGATION_DEPTH,
            store: StoreConfig::default(),
            log_level: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database directory, required for the sled backend.
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        info!("Loading engine config from: {:?}", path_ref);
        let text = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read engine config file at {:?}", path_ref))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse engine config at {:?}", path_ref))?;
        info!("Successfully loaded engine config from: {:?}", path_ref);
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.max_propagation_depth == 0 {
            anyhow::bail!("max_propagation_depth must be at least 1");
        }
        Ok(config)
    }

    /// Opens the configured store backend.
    pub fn open_store(&self) -> anyhow::Result<Arc<dyn ReputationStore>> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryReputationStore::new())),
            StoreBackend::Sled => {
                let path = self
                    .store
                    .path
                    .as_ref()
                    .context("store.path is required for the sled backend")?;
                let store = SledReputationStore::open(path)
                    .with_context(|| format!("Failed to open sled store at {:?}", path))?;
                info!(path = ?path, "Opened sled reputation store");
                Ok(Arc::new(store))
            }
        }
    }

    /// Installs a global fmt subscriber. `RUST_LOG` wins over `log_level`.
    /// Returns false when a subscriber was already installed.
    pub fn init_tracing(&self) -> bool {
        let log_level_str = self.log_level.as_deref().unwrap_or("info");
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(log_level_str))
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    }
}
