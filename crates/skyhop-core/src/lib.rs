pub mod config;
pub mod error;

pub use config::{
    Config, LocationConfig, ProviderConfig, StorageConfig, ValidationResult, WeatherConfig,
};
pub use error::{AppError, ConfigError};

use anyhow::Result;

/// Initialize logging for the host process.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("SkyHop core initialized");
    Ok(())
}
