//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level. `json` output is meant for
//! log shippers; `text` for terminals.

use crate::config::LoggingConfig;

use tracing_subscriber::EnvFilter;

pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

pub fn init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_target(false);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
}
