//! Tool configuration
//!
//! Loaded from TOML with built-in defaults. Lookup order: the path given
//! with `--config`, then `~/.config/dipboard/ctl.toml`, then defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Board identity and tool behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CtlConfig {
    /// USB vendor id of the board (decimal in TOML; 1351 = 0x0547)
    pub vendor_id: u16,
    /// USB product id of the board (4098 = 0x1002)
    pub product_id: u16,
    /// Default log filter, overridden by RUST_LOG or --log-level
    pub log_level: String,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x0547,
            product_id: 0x1002,
            log_level: "info".to_string(),
        }
    }
}

impl CtlConfig {
    /// Load configuration, following the lookup order.
    ///
    /// An explicitly given path must exist and parse; the default path is
    /// used only if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()));
        }
        if let Some(path) = Self::default_path()
            && path.exists()
        {
            return Self::from_file(&path)
                .with_context(|| format!("loading config from {}", path.display()));
        }
        Ok(Self::default())
    }

    /// Default config location under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dipboard").join("ctl.toml"))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
