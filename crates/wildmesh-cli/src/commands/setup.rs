use std::path::{Path, PathBuf};

use wildmesh_config::ConfigLoader;

const HEADER: &str = "# 🦌 Wildmesh configuration
# Every key is optional; missing keys take the defaults shown here.
# Environment overrides: WILDMESH_NODE_ID, WILDMESH_ROLE, WILDMESH_LOG_LEVEL,
# WILDMESH_HEARTBEAT_INTERVAL_MS, WILDMESH_COORDINATOR_TIMEOUT_MS, WILDMESH_AUTONOMOUS

";

/// Initialize a new wildmesh configuration with defaults.
pub(super) fn cmd_init(local: bool) -> wildmesh_core::Result<()> {
    let dir = if local {
        std::env::current_dir()?
    } else {
        ConfigLoader::default_dir()
    };

    match write_default_config(&dir)? {
        Some(path) => {
            println!("✅ Wrote {}", path.display());
            println!("   Set identity.node_id to a unique value on each device.");
        }
        None => {
            println!("⚠️  {} already exists", dir.join("wildmesh.toml").display());
            println!("   Run 'wildmesh doctor' to check it.");
        }
    }
    Ok(())
}

/// Write `wildmesh.toml` with the default settings into `dir`.
/// Returns `None` without touching anything if the file already exists.
pub fn write_default_config(dir: &Path) -> wildmesh_core::Result<Option<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let config_path = dir.join("wildmesh.toml");
    if config_path.exists() {
        return Ok(None);
    }
    let body = ConfigLoader::default_toml()?;
    std::fs::write(&config_path, format!("{HEADER}{body}"))?;
    Ok(Some(config_path))
}
