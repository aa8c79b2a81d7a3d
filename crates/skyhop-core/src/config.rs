use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides the provider API key from the file.
pub const API_KEY_ENV: &str = "SKYHOP_WEATHER_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Which stations to watch and how often to refresh them
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Upstream observation provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Local observation store
    #[serde(default)]
    pub storage: StorageConfig,
}

/// A fixed point to request observations around.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Station identifiers shown on the home screen
    #[serde(default = "default_stations")]
    pub stations: Vec<String>,

    /// Keep re-fetching on a timer while the app is open
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,

    /// Auto-refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// How old stored observations may be before they are re-fetched
    #[serde(default = "default_freshness")]
    pub freshness_minutes: u32,

    /// Optional point to query instead of (or alongside) the station list
    #[serde(default)]
    pub location: Option<LocationConfig>,
}

fn default_stations() -> Vec<String> {
    ["KLAX", "KSFO", "KSAN", "KPHX", "KDEN"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_auto_refresh() -> bool {
    true
}

fn default_refresh_interval() -> u32 {
    30
}

fn default_freshness() -> u32 {
    30
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            stations: default_stations(),
            auto_refresh: default_auto_refresh(),
            refresh_interval_minutes: default_refresh_interval(),
            freshness_minutes: default_freshness(),
            location: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Endpoint of the aviation weather function
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer key for the endpoint (optional, can be set via environment)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:54321/functions/v1/fetch-aviation-weather".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    /// API key from the environment, falling back to the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for persisted observations (default: `<config_dir>/weather.db`)
    #[serde(default)]
    pub database_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skyhop");

        Self {
            config_dir,
            weather: WeatherConfig::default(),
            provider: ProviderConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, writing defaults there if missing.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let mut config = Self::default();
            if let Some(parent) = config_path.parent() {
                config.config_dir = parent.to_path_buf();
            }
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", config_path.display(), e)))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.provider.endpoint, "provider.endpoint", &mut result);

        if self.provider.request_timeout_secs == 0 {
            result.add_error(
                "provider.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        let weather = &self.weather;
        if weather.refresh_interval_minutes == 0 {
            if weather.auto_refresh {
                result.add_error(
                    "weather.refresh_interval_minutes",
                    "Refresh interval must be greater than 0 when auto_refresh is on",
                );
            }
        } else if weather.refresh_interval_minutes > 1440 {
            result.add_warning(
                "weather.refresh_interval_minutes",
                "Weather refresh interval is more than 24 hours",
            );
        }

        if weather.freshness_minutes == 0 {
            result.add_error(
                "weather.freshness_minutes",
                "Freshness window must be greater than 0",
            );
        }

        for station in &weather.stations {
            if !looks_like_station_id(station) {
                result.add_warning(
                    "weather.stations",
                    format!("Unusual station identifier: {:?}", station),
                );
            }
        }

        match weather.location {
            Some(loc) => {
                if !(-90.0..=90.0).contains(&loc.lat) {
                    result.add_error("weather.location.lat", "Latitude must be within -90..=90");
                }
                if !(-180.0..=180.0).contains(&loc.lng) {
                    result.add_error(
                        "weather.location.lng",
                        "Longitude must be within -180..=180",
                    );
                }
            }
            None if weather.stations.is_empty() => {
                result.add_warning(
                    "weather",
                    "No stations or location configured - weather will always be empty",
                );
            }
            None => {}
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Where the observation store lives on disk.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config_dir.join("weather.db"))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skyhop");

        Ok(config_dir.join("config.toml"))
    }
}

/// ICAO-style identifiers: 3 or 4 ASCII alphanumerics.
fn looks_like_station_id(id: &str) -> bool {
    let id = id.trim();
    (3..=4).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_invalid_endpoint_url() {
        let mut config = Config::default();
        config.provider.endpoint = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "provider.endpoint"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.provider.endpoint = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_zero_interval_with_auto_refresh_is_error() {
        let mut config = Config::default();
        config.weather.refresh_interval_minutes = 0;
        let result = config.validate();
        assert!(!result.is_valid());

        config.weather.auto_refresh = false;
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_out_of_range_location() {
        let mut config = Config::default();
        config.weather.location = Some(LocationConfig { lat: 91.0, lng: -200.0 });
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "weather.location.lat"));
        assert!(result.errors.iter().any(|e| e.field == "weather.location.lng"));
    }

    #[test]
    fn test_odd_station_is_warning() {
        let mut config = Config::default();
        config.weather.stations.push("NOT A STATION".to_string());
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "weather.stations"));
    }

    #[test]
    fn test_nothing_to_watch_is_warning() {
        let mut config = Config::default();
        config.weather.stations.clear();
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "weather"));
    }

    #[test]
    fn test_load_from_writes_defaults_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.config_dir, dir.path());
        assert_eq!(created.weather.refresh_interval_minutes, 30);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.weather.stations, created.weather.stations);
        assert_eq!(reloaded.database_path(), dir.path().join("weather.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "config_dir = \"/tmp/skyhop\"\n\n[weather]\nstations = [\"KDEN\"]\n\n[weather.location]\nlat = 39.86\nlng = -104.67\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.weather.stations, vec!["KDEN".to_string()]);
        assert!(config.weather.auto_refresh);
        assert_eq!(config.weather.freshness_minutes, 30);
        assert_eq!(config.weather.location, Some(LocationConfig { lat: 39.86, lng: -104.67 }));
        assert_eq!(config.provider.request_timeout_secs, 10);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[weather\nstations = 3").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
