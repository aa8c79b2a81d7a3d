//! Persisted observations.
//!
//! `ObservationStore` is the read side the cache consults; `ObservationWriter`
//! is the write side used by collaborators that persist fresh fetches.
//! `SqliteObservationStore` implements both over a single `weather_data` table
//! holding the latest report per station.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::error::StoreError;
use crate::types::{FlightCategory, Observation};

/// Optional narrowing for `ObservationStore::query_all`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    pub flight_category: Option<FlightCategory>,
    /// Only rows updated at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Read access to persisted observations.
///
/// Results are ordered by `last_updated`, newest first.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Rows for the given stations. An empty slice yields an empty result.
    async fn query_by_stations(&self, station_ids: &[String])
        -> Result<Vec<Observation>, StoreError>;

    /// All rows, optionally filtered.
    async fn query_all(
        &self,
        filter: Option<&ObservationFilter>,
    ) -> Result<Vec<Observation>, StoreError>;
}

/// Write access to persisted observations.
#[async_trait]
pub trait ObservationWriter: Send + Sync {
    /// Insert or replace rows by station id. Returns the number written.
    async fn upsert(&self, observations: &[Observation]) -> Result<usize, StoreError>;
}

/// SQLite-backed observation store.
#[derive(Clone)]
pub struct SqliteObservationStore {
    conn: Arc<Mutex<Connection>>,
}

const COLUMNS: &str = "station_id, captured_at, last_updated, flight_category, temperature, \
    dewpoint, wind_speed, wind_direction, wind_gust, visibility, ceiling, altimeter, raw_text";

impl SqliteObservationStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (tests, ephemeral hosts).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Store task failed: {}", e)))?
    }

    /// Number of stations with a stored observation.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM weather_data", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
        .await
    }

    /// Delete every stored observation.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM weather_data", [])?;
            Ok(())
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS weather_data (
            station_id TEXT PRIMARY KEY,
            captured_at INTEGER,
            last_updated INTEGER NOT NULL,
            flight_category TEXT,
            temperature REAL,
            dewpoint REAL,
            wind_speed REAL,
            wind_direction INTEGER,
            wind_gust REAL,
            visibility REAL,
            ceiling INTEGER,
            altimeter REAL,
            raw_text TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_weather_data_updated ON weather_data(last_updated DESC);
        CREATE INDEX IF NOT EXISTS idx_weather_data_category ON weather_data(flight_category);
        "#,
    )?;
    Ok(())
}

fn millis_to_datetime(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    let captured_ms: Option<i64> = row.get(1)?;
    let updated_ms: i64 = row.get(2)?;
    let category: Option<String> = row.get(3)?;

    Ok(Observation {
        station_id: row.get(0)?,
        captured_at: captured_ms.map(|ms| millis_to_datetime(1, ms)).transpose()?,
        last_updated: millis_to_datetime(2, updated_ms)?,
        flight_category: category.and_then(|c| c.parse().ok()),
        temperature: row.get(4)?,
        dewpoint: row.get(5)?,
        wind_speed: row.get(6)?,
        wind_direction: row.get(7)?,
        wind_gust: row.get(8)?,
        visibility: row.get(9)?,
        ceiling: row.get(10)?,
        altimeter: row.get(11)?,
        raw_text: row.get(12)?,
    })
}

fn select_rows(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<Observation>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values), row_to_observation)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

#[async_trait]
impl ObservationStore for SqliteObservationStore {
    async fn query_by_stations(
        &self,
        station_ids: &[String],
    ) -> Result<Vec<Observation>, StoreError> {
        if station_ids.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Value> = station_ids.iter().cloned().map(Value::Text).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM weather_data WHERE station_id IN ({}) ORDER BY last_updated DESC",
            COLUMNS, placeholders
        );

        let rows = self.with_conn(move |conn| select_rows(conn, &sql, values)).await?;
        tracing::debug!(requested = station_ids.len(), found = rows.len(), "Store lookup by station");
        Ok(rows)
    }

    async fn query_all(
        &self,
        filter: Option<&ObservationFilter>,
    ) -> Result<Vec<Observation>, StoreError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut limit = String::new();

        if let Some(filter) = filter {
            if let Some(category) = filter.flight_category {
                clauses.push("flight_category = ?");
                values.push(Value::Text(category.as_str().to_string()));
            }
            if let Some(since) = filter.since {
                clauses.push("last_updated >= ?");
                values.push(Value::Integer(since.timestamp_millis()));
            }
            if let Some(n) = filter.limit {
                limit = format!(" LIMIT {}", n);
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM weather_data{} ORDER BY last_updated DESC{}",
            COLUMNS, where_sql, limit
        );

        self.with_conn(move |conn| select_rows(conn, &sql, values)).await
    }
}

#[async_trait]
impl ObservationWriter for SqliteObservationStore {
    async fn upsert(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        if observations.is_empty() {
            return Ok(0);
        }

        let rows = observations.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT OR REPLACE INTO weather_data ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    COLUMNS
                ))?;
                for obs in &rows {
                    stmt.execute(params![
                        obs.station_id,
                        obs.captured_at.map(|t| t.timestamp_millis()),
                        obs.last_updated.timestamp_millis(),
                        obs.flight_category.map(|c| c.as_str()),
                        obs.temperature,
                        obs.dewpoint,
                        obs.wind_speed,
                        obs.wind_direction,
                        obs.wind_gust,
                        obs.visibility,
                        obs.ceiling,
                        obs.altimeter,
                        obs.raw_text,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn obs(station: &str, minutes_ago: i64) -> Observation {
        Observation::new(station, Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing() {
        let store = SqliteObservationStore::in_memory().unwrap();
        let rows = store.query_by_stations(&["KLAX".to_string()]).await.unwrap();
        assert!(rows.is_empty());
        assert!(store.query_all(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_by_stations_orders_newest_first() {
        let store = SqliteObservationStore::in_memory().unwrap();
        store
            .upsert(&[obs("KLAX", 20), obs("KSFO", 5), obs("KDEN", 10)])
            .await
            .unwrap();

        let rows = store
            .query_by_stations(&["KLAX".to_string(), "KSFO".to_string()])
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|o| o.station_id.as_str()).collect();
        assert_eq!(ids, vec!["KSFO", "KLAX"]);
    }

    #[tokio::test]
    async fn test_empty_station_list_short_circuits() {
        let store = SqliteObservationStore::in_memory().unwrap();
        store.upsert(&[obs("KLAX", 1)]).await.unwrap();
        assert!(store.query_by_stations(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_station() {
        let store = SqliteObservationStore::in_memory().unwrap();
        store
            .upsert(&[obs("KPHX", 60).with_temperature(101.0)])
            .await
            .unwrap();
        store
            .upsert(&[obs("KPHX", 0).with_temperature(97.0)])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let rows = store.query_by_stations(&["KPHX".to_string()]).await.unwrap();
        assert_eq!(rows[0].temperature, Some(97.0));
    }

    #[tokio::test]
    async fn test_round_trips_optional_fields() {
        let store = SqliteObservationStore::in_memory().unwrap();
        let captured = DateTime::from_timestamp_millis(1_760_640_660_000).unwrap();
        let original = Observation::new("KSAN", captured)
            .with_captured_at(captured)
            .with_temperature(68.0)
            .with_wind(12.0, Some(270))
            .with_conditions(Some(4.0), Some(2500))
            .with_raw_text("KSAN 161851Z 27012KT 4SM BKN025 20/15 A2992");
        store.upsert(std::slice::from_ref(&original)).await.unwrap();

        let rows = store.query_all(None).await.unwrap();
        assert_eq!(rows, vec![original]);
        assert_eq!(rows[0].flight_category, Some(FlightCategory::Mvfr));
    }

    #[tokio::test]
    async fn test_query_all_filters() {
        let store = SqliteObservationStore::in_memory().unwrap();
        store
            .upsert(&[
                obs("KLAX", 5).with_flight_category(FlightCategory::Vfr),
                obs("KSFO", 15).with_flight_category(FlightCategory::Ifr),
                obs("KDEN", 90).with_flight_category(FlightCategory::Vfr),
            ])
            .await
            .unwrap();

        let vfr = ObservationFilter {
            flight_category: Some(FlightCategory::Vfr),
            ..Default::default()
        };
        let rows = store.query_all(Some(&vfr)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].station_id, "KLAX");

        let recent = ObservationFilter {
            since: Some(Utc::now() - Duration::minutes(30)),
            limit: Some(1),
            ..Default::default()
        };
        let rows = store.query_all(Some(&recent)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].station_id, "KLAX");
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SqliteObservationStore::in_memory().unwrap();
        store.upsert(&[obs("KLAX", 1), obs("KSFO", 1)]).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weather.db");

        {
            let store = SqliteObservationStore::open(&path).unwrap();
            store.upsert(&[obs("KDEN", 2)]).await.unwrap();
        }

        let reopened = SqliteObservationStore::open(&path).unwrap();
        let rows = reopened.query_by_stations(&["KDEN".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
