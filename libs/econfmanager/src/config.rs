//! Store configuration
//!
//! Loaded with figment: built-in defaults, then an optional YAML file, then
//! `ECONF_`-prefixed environment variables (`ECONF_SAVE_DB_PATH=...`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EconfError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ECONF_";

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_persist_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconfConfig {
    /// Factory/current snapshot, read only
    pub primary_db_path: PathBuf,
    /// Database receiving saved changes
    pub save_db_path: PathBuf,
    /// Directory holding `defaults.json` and default blob files
    #[serde(default)]
    pub default_data_dir: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
}

impl Default for EconfConfig {
    fn default() -> Self {
        Self {
            primary_db_path: PathBuf::from("data/primary.db"),
            save_db_path: PathBuf::from("data/saved.db"),
            default_data_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            persist_timeout_ms: default_persist_timeout_ms(),
        }
    }
}

impl EconfConfig {
    /// Defaults, optional YAML file, then `ECONF_*` environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::figment(path).extract::<Self>()?.validated()
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(EconfConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Reject values the store cannot work with
    pub fn validated(self) -> Result<Self> {
        if self.poll_interval_ms == 0 {
            return Err(EconfError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.persist_timeout_ms == 0 {
            return Err(EconfError::Config(
                "persist_timeout_ms must be positive".to_string(),
            ));
        }
        if self.primary_db_path == self.save_db_path {
            return Err(EconfError::Config(format!(
                "primary and save database are the same file: {}",
                self.save_db_path.display()
            )));
        }
        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}
