//! econfctl configuration
//!
//! Layered with figment: defaults, optional YAML file, then `ECONFCTL_`
//! environment variables using `__` for nesting
//! (`ECONFCTL_ECONF__SAVE_DB_PATH=/data/saved.db`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::logging::LogConfig;
use econfmanager::EconfConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "ECONFCTL_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtlConfig {
    #[serde(default)]
    pub econf: EconfConfig,
    #[serde(default = "default_logging")]
    pub logging: LogConfig,
    /// JSON file sampled by `watch` when no `--source` is given
    #[serde(default)]
    pub source: Option<PathBuf>,
}

fn default_logging() -> LogConfig {
    LogConfig {
        app_name: "econfctl".to_string(),
        level: "warn".to_string(),
        ..LogConfig::default()
    }
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            econf: EconfConfig::default(),
            logging: default_logging(),
            source: None,
        }
    }
}

impl CtlConfig {
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(CtlConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("config file {} not found", path.display());
            }
        }
        let mut config: CtlConfig = Self::figment(path)
            .extract()
            .context("invalid econfctl configuration")?;
        config.econf = config.econf.validated()?;
        Ok(config)
    }
}
