//! In-memory collaborators for cache tests.
//!
//! Neither fake touches a blocking pool, so they work under tokio's paused clock.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use skyhop_weather::{
    GeoPoint, Observation, ObservationFilter, ObservationProvider, ObservationStore, ProviderError,
    StoreError,
};

pub fn observation(station: &str, minutes_ago: i64) -> Observation {
    Observation::new(station, Utc::now() - TimeDelta::minutes(minutes_ago))
}

pub fn station_ids(observations: &[Observation]) -> Vec<String> {
    observations.iter().map(|o| o.station_id.clone()).collect()
}

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<Vec<Observation>>,
    failing: AtomicBool,
    reads: AtomicUsize,
    unfiltered_reads: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_rows(rows: Vec<Observation>) -> Arc<Self> {
        let store = Self::new();
        store.set_rows(rows);
        store
    }

    pub fn set_rows(&self, rows: Vec<Observation>) {
        *self.rows.lock() = rows;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn unfiltered_reads(&self) -> usize {
        self.unfiltered_reads.load(Ordering::SeqCst)
    }

    fn select(&self, keep: impl Fn(&Observation) -> bool) -> Result<Vec<Observation>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is locked".into()));
        }

        let mut rows: Vec<Observation> = self.rows.lock().iter().filter(|o| keep(*o)).cloned().collect();
        rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(rows)
    }
}

#[async_trait]
impl ObservationStore for FakeStore {
    async fn query_by_stations(&self, station_ids: &[String]) -> Result<Vec<Observation>, StoreError> {
        self.select(|o| station_ids.contains(&o.station_id))
    }

    async fn query_all(
        &self,
        _filter: Option<&ObservationFilter>,
    ) -> Result<Vec<Observation>, StoreError> {
        self.unfiltered_reads.fetch_add(1, Ordering::SeqCst);
        self.select(|_| true)
    }
}

/// Echoes the requested stations back as fresh observations unless told to fail.
#[derive(Default)]
pub struct FakeProvider {
    failure: Mutex<Option<ProviderError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<(Vec<String>, Option<GeoPoint>)>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: ProviderError) -> Arc<Self> {
        let provider = Self::new();
        provider.fail_with(Some(error));
        provider
    }

    pub fn fail_with(&self, error: Option<ProviderError>) {
        *self.failure.lock() = error;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Vec<String>, Option<GeoPoint>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ObservationProvider for FakeProvider {
    async fn fetch(
        &self,
        stations: &[String],
        location: Option<GeoPoint>,
    ) -> Result<Vec<Observation>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((stations.to_vec(), location));

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failure.lock().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(stations
                .iter()
                .map(|s| Observation::new(s.clone(), Utc::now()))
                .collect()),
        }
    }
}
