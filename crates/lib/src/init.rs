//! Initialize the configuration directory: create ~/.techwolf, a default config, and the
//! sessions root.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the sessions root named by the effective config.
///
/// Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let sessions_dir = &config.bot.sessions_dir;
    if !sessions_dir.exists() {
        std::fs::create_dir_all(sessions_dir)
            .with_context(|| format!("creating sessions directory {}", sessions_dir.display()))?;
        log::info!("created sessions directory at {}", sessions_dir.display());
    } else {
        log::debug!("sessions directory already exists at {}, skipping", sessions_dir.display());
    }

    Ok(config_dir.to_path_buf())
}
