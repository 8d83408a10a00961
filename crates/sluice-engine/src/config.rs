//! Runner configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sluice_types::Address;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "SLUICE_CONFIG";

/// Deploy-time runner parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Performance fee skimmed from harvested yield, in basis points.
    #[serde(default)]
    pub performance_fee_bps: u16,
    /// Fee recipient. No fee is skimmed while unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treasury: Option<Address>,
    /// Buffer size of the event channel per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Upper bound on records returned by a snapshot query.
    #[serde(default = "default_snapshot_query_limit")]
    pub snapshot_query_limit: usize,
}

fn default_event_capacity() -> usize {
    1024
}

fn default_snapshot_query_limit() -> usize {
    256
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            performance_fee_bps: 0,
            treasury: None,
            event_capacity: default_event_capacity(),
            snapshot_query_limit: default_snapshot_query_limit(),
        }
    }
}

impl RunnerConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from `path`.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&content)?;
            tracing::debug!(path = %path.display(), "runner config loaded");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from `$SLUICE_CONFIG`, or `./sluice.toml` when unset.
    pub fn load_default() -> anyhow::Result<Self> {
        Self::load(Self::config_path())
    }

    fn config_path() -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("sluice.toml"))
    }
}
