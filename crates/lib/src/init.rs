//! Initialize the configuration directory: create ~/.catarina, the default
//! config file, and the bundled system prompt.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_SYSTEM_PROMPT: &str = include_str!("../config/PROMPT.md");

/// Ensure the configuration directory has been initialized.
pub fn require_initialized(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `catarina init` first (config file not found: {})",
            config_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of the config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Seeds `PROMPT.md` from the bundled default if missing.
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

    let prompt_path = config_dir.join("PROMPT.md");
    if !prompt_path.exists() {
        std::fs::write(&prompt_path, DEFAULT_SYSTEM_PROMPT)
            .with_context(|| format!("writing default PROMPT.md to {}", prompt_path.display()))?;
        log::info!("wrote default PROMPT.md to {}", prompt_path.display());
    }

    Ok(config_dir.to_path_buf())
}
