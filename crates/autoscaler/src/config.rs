//! Process configuration: YAML file layered under `AUTOSCALER_*` environment variables

use anyhow::{Context, Result};
use autoscaler_lib::config::{AutoscalerConfig, RawConfig};
use ::config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "AUTOSCALER_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/swarm-autoscaler/config.yaml";

/// Load and validate the configuration
///
/// The file is optional at the default location but required when named
/// explicitly through `AUTOSCALER_CONFIG`.
pub fn load() -> Result<AutoscalerConfig> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) => load_from(&PathBuf::from(path), true),
        None => load_from(Path::new(DEFAULT_CONFIG_PATH), false),
    }
}

pub fn load_from(path: &Path, required: bool) -> Result<AutoscalerConfig> {
    let config = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Yaml)
                .required(required),
        )
        .add_source(
            Environment::with_prefix("AUTOSCALER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    let raw = RawConfig::from_config(config).context("Failed to parse configuration")?;
    AutoscalerConfig::from_raw(raw).context("Invalid autoscaler configuration")
}
