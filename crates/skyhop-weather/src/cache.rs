//! Freshness-managed weather observations.
//!
//! `WeatherCache` answers "what is the weather at these stations" with the
//! best data available: persisted rows while they are inside the freshness
//! window, a provider fetch otherwise, and the persisted rows again if the
//! provider fails. State is published through a `watch` channel so any number
//! of readers can follow loads as they happen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::error::{StoreError, WeatherError};
use crate::provider::ObservationProvider;
use crate::refresh::RefreshTask;
use crate::store::ObservationStore;
use crate::types::{GeoPoint, Observation, WeatherQuery};

pub const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 60);

/// What a cache instance watches and how eagerly it refreshes.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherOptions {
    pub stations: Vec<String>,
    pub location: Option<GeoPoint>,
    pub auto_refresh: bool,
    pub refresh_interval_minutes: u64,
    /// Persisted rows newer than this are used without asking the provider
    pub freshness_window: Duration,
}

impl Default for WeatherOptions {
    fn default() -> Self {
        Self {
            stations: Vec::new(),
            location: None,
            auto_refresh: false,
            refresh_interval_minutes: DEFAULT_REFRESH_INTERVAL_MINUTES,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}

impl WeatherOptions {
    pub fn new<I, S>(stations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stations: stations.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_auto_refresh(mut self, interval_minutes: u64) -> Self {
        self.auto_refresh = true;
        self.refresh_interval_minutes = interval_minutes;
        self
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    pub fn query(&self) -> WeatherQuery {
        WeatherQuery::new(&self.stations, self.location)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    /// Nothing loaded yet
    #[default]
    Idle,
    Loading,
    Ready,
    /// Last load failed upstream; held data may be old or missing
    Degraded,
}

/// Where the held observations came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Persisted rows inside the freshness window
    Store,
    Provider,
    /// Persisted rows read after a provider failure
    Fallback,
}

/// Point-in-time view of a cache instance.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub observations: Arc<[Observation]>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Freshness of the held data, not of the last attempt
    pub last_updated: Option<DateTime<Utc>>,
    pub status: CacheStatus,
    pub source: Option<DataSource>,
}

impl Default for WeatherSnapshot {
    fn default() -> Self {
        Self {
            observations: Arc::from(Vec::new()),
            is_loading: false,
            error: None,
            last_updated: None,
            status: CacheStatus::Idle,
            source: None,
        }
    }
}

impl WeatherSnapshot {
    pub fn has_data(&self) -> bool {
        !self.observations.is_empty()
    }

    pub fn observation(&self, station_id: &str) -> Option<&Observation> {
        self.observations
            .iter()
            .find(|o| o.station_id.eq_ignore_ascii_case(station_id))
    }

    /// Human-readable age of the held data ("just now", "5m ago", "2h ago").
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let Some(updated) = self.last_updated else {
            return "never".to_string();
        };

        let minutes = (now - updated).num_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Most recent `last_updated` across the rows.
pub fn newest_update(observations: &[Observation]) -> Option<DateTime<Utc>> {
    observations.iter().map(|o| o.last_updated).max()
}

/// Strictly inside the window; future timestamps count as fresh.
pub fn is_fresh(newest: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match TimeDelta::from_std(window) {
        Ok(window) => now - newest < window,
        Err(_) => true,
    }
}

struct Settings {
    query: WeatherQuery,
    freshness_window: Duration,
    /// Bumped on reconfigure; loads started under an older value don't publish
    generation: u64,
}

struct Inner {
    store: Arc<dyn ObservationStore>,
    provider: Arc<dyn ObservationProvider>,
    settings: RwLock<Settings>,
    state: watch::Sender<WeatherSnapshot>,
    load_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_closed() && self.settings.read().generation == generation
    }

    fn publish(&self, generation: u64, update: impl FnOnce(&mut WeatherSnapshot)) -> bool {
        if !self.is_current(generation) {
            tracing::debug!(generation, "Discarding load result for retired query");
            return false;
        }
        self.state.send_modify(update);
        true
    }

    async fn read_store(&self, query: &WeatherQuery) -> Result<Vec<Observation>, StoreError> {
        if query.stations.is_empty() {
            self.store.query_all(None).await
        } else {
            self.store.query_by_stations(&query.stations).await
        }
    }

    fn adopt(&self, generation: u64, rows: Vec<Observation>, updated: DateTime<Utc>, source: DataSource) {
        self.publish(generation, |s| {
            s.observations = Arc::from(rows);
            s.last_updated = Some(updated);
            s.source = Some(source);
            s.status = CacheStatus::Ready;
            s.is_loading = false;
        });
    }

    async fn load(&self, force_refresh: bool) {
        let _serial = self.load_lock.lock().await;
        if self.is_closed() {
            return;
        }

        let (query, window, generation) = {
            let settings = self.settings.read();
            (
                settings.query.clone(),
                settings.freshness_window,
                settings.generation,
            )
        };

        let (previous_status, previous_error) = {
            let current = self.state.borrow();
            (current.status, current.error.clone())
        };
        let started = self.publish(generation, |s| {
            s.is_loading = true;
            s.error = None;
            s.status = CacheStatus::Loading;
        });
        if !started {
            return;
        }
        let _settle = LoadGuard {
            inner: self,
            generation,
            previous_status,
            previous_error,
        };

        if query.is_empty() {
            tracing::debug!("No stations or location configured");
            self.publish(generation, |s| {
                s.observations = Arc::from(Vec::new());
                s.last_updated = None;
                s.source = None;
                s.status = CacheStatus::Ready;
                s.is_loading = false;
            });
            return;
        }

        if !force_refresh {
            match self.read_store(&query).await {
                Ok(rows) => match newest_update(&rows) {
                    Some(newest) if is_fresh(newest, Utc::now(), window) => {
                        tracing::debug!(count = rows.len(), %newest, "Using stored observations");
                        self.adopt(generation, rows, newest, DataSource::Store);
                        return;
                    }
                    Some(newest) => tracing::debug!(%newest, "Stored observations are stale"),
                    None => tracing::debug!("No stored observations"),
                },
                // An unreadable store counts as a miss; the provider still gets asked.
                Err(e) => tracing::warn!(error = %e, "Store read failed, fetching from provider"),
            }
        }

        match self.provider.fetch(&query.stations, query.location).await {
            Ok(rows) => {
                tracing::info!(count = rows.len(), force_refresh, "Fetched fresh observations");
                self.adopt(generation, rows, Utc::now(), DataSource::Provider);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    transient = e.is_transient(),
                    "Provider fetch failed, falling back to stored observations"
                );
                let message = e.to_string();

                let fallback = match self.read_store(&query).await {
                    Ok(rows) => rows,
                    Err(store_err) => {
                        tracing::warn!(error = %store_err, "Fallback store read failed");
                        Vec::new()
                    }
                };

                self.publish(generation, |s| {
                    if let Some(newest) = newest_update(&fallback) {
                        s.observations = Arc::from(fallback);
                        s.last_updated = Some(newest);
                        s.source = Some(DataSource::Fallback);
                    }
                    s.error = Some(message);
                    s.status = CacheStatus::Degraded;
                    s.is_loading = false;
                });
            }
        }
    }
}

/// Puts the snapshot back how it was if a load is dropped mid-flight.
///
/// Every finished load has already cleared `is_loading`, so this only acts on
/// cancellation.
struct LoadGuard<'a> {
    inner: &'a Inner,
    generation: u64,
    previous_status: CacheStatus,
    previous_error: Option<String>,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.inner.is_current(self.generation) {
            return;
        }
        let status = self.previous_status;
        let error = self.previous_error.take();
        self.inner.state.send_if_modified(|s| {
            if !s.is_loading {
                return false;
            }
            tracing::debug!(generation = self.generation, "Load cancelled before completion");
            s.is_loading = false;
            s.status = status;
            s.error = error;
            true
        });
    }
}

/// Weather for one set of stations (or one location), kept fresh.
///
/// Each instance is independent. Dropping it stops its refresh timer and
/// discards the result of any load still in flight.
pub struct WeatherCache {
    inner: Arc<Inner>,
    refresh: Mutex<Option<RefreshTask>>,
}

impl WeatherCache {
    /// Create an idle cache. Nothing is loaded and no timer runs.
    pub fn new(
        options: WeatherOptions,
        store: Arc<dyn ObservationStore>,
        provider: Arc<dyn ObservationProvider>,
    ) -> Self {
        let (state, _) = watch::channel(WeatherSnapshot::default());
        let settings = Settings {
            query: options.query(),
            freshness_window: options.freshness_window,
            generation: 0,
        };

        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                settings: RwLock::new(settings),
                state,
                load_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
            refresh: Mutex::new(None),
        }
    }

    /// Create a cache, start its timer if configured, and run the initial load.
    pub async fn mount(
        options: WeatherOptions,
        store: Arc<dyn ObservationStore>,
        provider: Arc<dyn ObservationProvider>,
    ) -> Result<Self, WeatherError> {
        let auto_refresh = options.auto_refresh.then_some(options.refresh_interval_minutes);
        let cache = Self::new(options, store, provider);

        if let Some(minutes) = auto_refresh {
            cache.start_auto_refresh(minutes)?;
        }
        cache.load(false).await;

        Ok(cache)
    }

    /// Load observations, trusting fresh persisted rows unless `force_refresh`.
    ///
    /// Never fails; problems are reported through the snapshot's `error`.
    /// Concurrent calls on one instance run one after another.
    pub async fn load(&self, force_refresh: bool) {
        self.inner.load(force_refresh).await;
    }

    /// Fetch from the provider regardless of persisted freshness.
    pub async fn refetch(&self) {
        self.load(true).await;
    }

    pub fn snapshot(&self) -> WeatherSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver that wakes on every state change.
    pub fn subscribe(&self) -> watch::Receiver<WeatherSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn query(&self) -> WeatherQuery {
        self.inner.settings.read().query.clone()
    }

    /// Force a provider fetch every `interval_minutes`, replacing any running timer.
    pub fn start_auto_refresh(&self, interval_minutes: u64) -> Result<(), WeatherError> {
        if interval_minutes == 0 {
            return Err(WeatherError::InvalidInterval);
        }
        self.start_auto_refresh_every(Duration::from_secs(interval_minutes.saturating_mul(60)))
    }

    /// Like `start_auto_refresh` with an arbitrary period.
    pub fn start_auto_refresh_every(&self, period: Duration) -> Result<(), WeatherError> {
        if period.is_zero() {
            return Err(WeatherError::InvalidInterval);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WeatherError::NoRuntime(e.to_string()))?;

        let owner: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = RefreshTask::spawn(&runtime, period, move || {
            let inner = owner.upgrade()?;
            Some(async move {
                tracing::debug!("Auto-refresh tick");
                inner.load(true).await;
            })
        });

        if let Some(previous) = self.refresh.lock().replace(task) {
            previous.cancel();
        }
        tracing::info!(?period, "Auto-refresh started");
        Ok(())
    }

    /// Cancel the refresh timer. Safe to call repeatedly or when none is running.
    pub fn stop_auto_refresh(&self) {
        if let Some(task) = self.refresh.lock().take() {
            task.cancel();
            tracing::info!("Auto-refresh stopped");
        }
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.refresh.lock().as_ref().is_some_and(RefreshTask::is_active)
    }

    /// Period of the running refresh timer, if any.
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh
            .lock()
            .as_ref()
            .filter(|task| task.is_active())
            .map(RefreshTask::period)
    }

    /// Switch to a new station set, location or cadence.
    ///
    /// The old timer is cancelled, results of loads for the old query are
    /// discarded, and a load for the new query runs before this returns.
    /// Invalid timer settings are rejected before anything changes.
    pub async fn reconfigure(&self, options: WeatherOptions) -> Result<(), WeatherError> {
        if options.auto_refresh {
            if options.refresh_interval_minutes == 0 {
                return Err(WeatherError::InvalidInterval);
            }
            tokio::runtime::Handle::try_current()
                .map_err(|e| WeatherError::NoRuntime(e.to_string()))?;
        }

        self.stop_auto_refresh();

        {
            let mut settings = self.inner.settings.write();
            settings.query = options.query();
            settings.freshness_window = options.freshness_window;
            settings.generation += 1;
            tracing::info!(
                stations = ?settings.query.stations,
                generation = settings.generation,
                "Weather query reconfigured"
            );
        }

        if options.auto_refresh {
            self.start_auto_refresh(options.refresh_interval_minutes)?;
        }
        self.load(false).await;
        Ok(())
    }
}

impl Drop for WeatherCache {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.stop_auto_refresh();
    }
}
