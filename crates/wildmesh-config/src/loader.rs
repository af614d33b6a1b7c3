use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use wildmesh_core::WildError;

use crate::schema::WildmeshConfig;

/// Loads and reloads the wildmesh configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<WildmeshConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WILDMESH_CONFIG env > ~/.wildmesh/wildmesh.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WILDMESH_CONFIG") {
            return PathBuf::from(p);
        }
        Self::default_dir().join("wildmesh.toml")
    }

    /// `~/.wildmesh`, or `./.wildmesh` when there is no home directory.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wildmesh")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> wildmesh_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WildmeshConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(WildError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn parse(raw: &str, path: &Path) -> wildmesh_core::Result<WildmeshConfig> {
        toml::from_str::<WildmeshConfig>(raw).map_err(|e| {
            WildError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WildmeshConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<WildmeshConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn apply_env_overrides(config: WildmeshConfig) -> WildmeshConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply `WILDMESH_*` overrides read through `lookup`.
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides<F>(mut config: WildmeshConfig, lookup: F) -> WildmeshConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unparsable override");
                    None
                }
            }
        }

        if let Some(id) = parsed("WILDMESH_NODE_ID", lookup("WILDMESH_NODE_ID")) {
            config.identity.node_id = id;
        }
        if let Some(role) = parsed("WILDMESH_ROLE", lookup("WILDMESH_ROLE")) {
            config.identity.role = role;
        }
        if let Some(level) = lookup("WILDMESH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(ms) = parsed(
            "WILDMESH_HEARTBEAT_INTERVAL_MS",
            lookup("WILDMESH_HEARTBEAT_INTERVAL_MS"),
        ) {
            config.node.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = parsed(
            "WILDMESH_COORDINATOR_TIMEOUT_MS",
            lookup("WILDMESH_COORDINATOR_TIMEOUT_MS"),
        ) {
            config.node.coordinator_timeout_ms = ms;
        }
        if let Some(on) = parsed("WILDMESH_AUTONOMOUS", lookup("WILDMESH_AUTONOMOUS")) {
            config.node.enable_autonomous_mode = on;
        }
        config
    }

    /// Reload the config from disk. The current config is kept if the new
    /// one fails to parse or validate.
    pub fn reload(&self) -> wildmesh_core::Result<()> {
        if !self.config_path.exists() {
            return Err(WildError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::parse(&raw, &self.config_path)?;
        let new_config = Self::apply_env_overrides(new_config);
        new_config.validate().map_err(WildError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Render the defaults as a TOML document for `wildmesh init`.
    pub fn default_toml() -> wildmesh_core::Result<String> {
        toml::to_string_pretty(&WildmeshConfig::default())
            .map_err(|e| WildError::Config(format!("failed to render default config: {e}")))
    }
}
