//! Preset persistence.
//!
//! Saves and loads the parameter preset as pretty-printed JSON under the
//! user config directory. A missing preset is not an error — it just
//! means the first-run wizard needs to collect parameters.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::TradeParameters;

const PRESET_FILE: &str = "preset.json";

/// Per-user config directory (`~/.config/scalper`, `%APPDATA%\scalper`
/// on Windows), created on first use.
pub fn config_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    let base = std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .context("APPDATA is not set")?;

    #[cfg(not(windows))]
    let base = std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config"))
        .context("HOME is not set")?;

    let dir = base.join("scalper");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
    Ok(dir)
}

fn resolve(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(config_dir()?.join(PRESET_FILE)),
    }
}

/// Save the preset as pretty JSON.
pub fn save_preset(params: &TradeParameters, path: Option<&Path>) -> Result<()> {
    let path = resolve(path)?;
    let json = serde_json::to_string_pretty(params).context("Failed to serialise preset")?;

    std::fs::write(&path, &json)
        .with_context(|| format!("Failed to write preset to {}", path.display()))?;

    debug!(path = %path.display(), pair = %params.pair, "Preset saved");
    Ok(())
}

/// Load the preset. Returns `None` if the file doesn't exist
/// (first run — the wizard takes over).
pub fn load_preset(path: Option<&Path>) -> Result<Option<TradeParameters>> {
    let path = resolve(path)?;

    if !path.exists() {
        info!(path = %path.display(), "No saved preset found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read preset from {}", path.display()))?;

    let params: TradeParameters = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse preset from {}", path.display()))?;

    info!(path = %path.display(), pair = %params.pair, "Preset loaded");
    Ok(Some(params))
}

/// Delete the preset file (for reset or testing).
pub fn delete_preset(path: Option<&Path>) -> Result<()> {
    let path = resolve(path)?;
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete preset {}", path.display()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
