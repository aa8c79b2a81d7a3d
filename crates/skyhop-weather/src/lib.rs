//! Aviation weather for SkyHop.
//!
//! Station observations come from a persisted store while fresh and from an
//! upstream provider otherwise, with the store as a fallback when the provider
//! fails. `WeatherCache` ties the two together and keeps itself refreshed.

pub mod cache;
pub mod error;
pub mod provider;
mod refresh;
pub mod retry;
pub mod store;
pub mod types;

pub use cache::{CacheStatus, DataSource, WeatherCache, WeatherOptions, WeatherSnapshot};
pub use error::{ProviderError, StoreError, WeatherError};
pub use provider::{HttpObservationProvider, ObservationProvider, PersistingProvider};
pub use retry::RetryPolicy;
pub use store::{ObservationFilter, ObservationStore, ObservationWriter, SqliteObservationStore};
pub use types::*;
