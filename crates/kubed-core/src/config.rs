//! `~/.kubed-sh.toml` configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::env::EnvTable;

/// File name looked up in the home directory.
pub const CONFIG_FILE: &str = ".kubed-sh.toml";

/// Default pre-pull wait when the config does not set one.
pub const DEFAULT_PREPULL_WAIT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubedConfig {
    /// Overrides applied on top of the environment defaults.
    pub env: Option<HashMap<String, String>>,
    pub prepull: Option<PrepullConfig>,
    pub shell: Option<ShellConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepullConfig {
    /// Seconds to wait for the pre-pull DaemonSets to pull their images.
    pub wait_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Context to switch to at start instead of the kubeconfig's current one.
    pub context: Option<String>,
}

impl KubedConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KubedConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load an explicit config file, or `~/.kubed-sh.toml` if it exists.
    ///
    /// An explicit path must exist; a missing home config yields defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply the `[env]` overrides to the table.
    pub fn apply_env(&self, env: &EnvTable) {
        if let Some(vars) = &self.env {
            for (name, value) in vars {
                env.set(name, value);
            }
        }
    }

    pub fn prepull_wait_secs(&self) -> u64 {
        self.prepull
            .as_ref()
            .and_then(|p| p.wait_secs)
            .unwrap_or(DEFAULT_PREPULL_WAIT_SECS)
    }

    pub fn start_context(&self) -> Option<&str> {
        self.shell.as_ref().and_then(|s| s.context.as_deref())
    }
}

/// `$HOME/.kubed-sh.toml`, if `HOME` is set.
pub fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE))
}
