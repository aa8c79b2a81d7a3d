//! Application-level error types for SkyHop.
//!
//! Library crates keep their own precise errors; this hierarchy is what the
//! host surfaces, with `user_message()` giving text suitable for display.

use thiserror::Error;

/// Errors the host reports to the user.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Weather error: {0}")]
    Weather(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Create a storage error from anything displayable.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Create a network error from anything displayable.
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }

    pub fn weather(err: impl std::fmt::Display) -> Self {
        Self::Weather(err.to_string())
    }

    /// Recover the typed cause of a config load failure from its `anyhow` chain.
    pub fn from_config_load(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ConfigError>() {
            Ok(config) => return Self::Config(config),
            Err(other) => other,
        };
        match err.downcast::<std::io::Error>() {
            Ok(io) => Self::Io(io),
            Err(other) => Self::Other(other),
        }
    }

    /// Text safe to show to the person at the terminal.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.user_message(),
            AppError::Storage(_) => "Unable to access saved weather. Try restarting the app.",
            AppError::Network(_) => "Unable to reach the weather service. Check your connection.",
            AppError::Weather(_) => "Weather is unavailable right now. Try again shortly.",
            AppError::Io(_) => "Could not read or write a SkyHop file.",
            AppError::Other(_) => "Something went wrong. Run with RUST_LOG=debug for details.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}
