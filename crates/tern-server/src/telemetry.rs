//! Logging setup.
//!
//! Console output through `tracing-subscriber`, optionally as JSON lines.
//! `RUST_LOG` overrides the configured filter.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::settings::LoggingConfig;

const DEFAULT_FILTER: &str = "info,tern_server=debug,tern_xmpp=debug";

fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directives).with_context(|| format!("invalid log filter '{directives}'"))
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let (json_layer, text_layer) = if config.json {
        (
            Some(fmt::layer().json().with_current_span(true).with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter(config)?)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            json: false,
            filter: Some("tern_xmpp=notalevel".to_string()),
        };
        assert!(filter(&config).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
