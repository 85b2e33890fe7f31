//! Server configuration loading.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. the TOML file given with `--config` (optional)
//! 3. `TERN_*` environment variables, `__` separating sections
//!    (e.g. `TERN_SERVER__DOMAIN=example.com`)

use std::path::Path;

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tern_xmpp::CoreConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: CoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter directives used when `RUST_LOG` is unset
    pub filter: Option<String>,
}

/// Load the configuration, with an optional file on top of the defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("TERN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder
        .build()
        .context("failed to read configuration sources")?
        .try_deserialize()
        .context("failed to parse configuration")?;
    config
        .server
        .validate()
        .context("invalid server configuration")?;
    Ok(config)
}
