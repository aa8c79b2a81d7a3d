use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use skyhop_core::{AppError, Config, WeatherConfig};
use skyhop_weather::{
    GeoPoint, HttpObservationProvider, PersistingProvider, SqliteObservationStore, WeatherCache,
    WeatherOptions, WeatherSnapshot,
};

#[tokio::main]
async fn main() -> Result<()> {
    skyhop_core::init()?;

    if let Err(e) = run().await {
        tracing::error!(error = %e, "SkyHop weather failed");
        eprintln!("{}", e.user_message());
        return Err(e.into());
    }

    Ok(())
}

async fn run() -> Result<(), AppError> {
    let (config, _) = Config::load_validated().map_err(AppError::from_config_load)?;
    tracing::info!(config_dir = %config.config_dir.display(), "Configuration loaded");

    let store = SqliteObservationStore::open(config.database_path()).map_err(AppError::storage)?;
    let http = HttpObservationProvider::new(
        config.provider.endpoint.clone(),
        Duration::from_secs(config.provider.request_timeout_secs),
    )
    .map_err(AppError::network)?
    .with_api_key(config.provider.resolved_api_key());
    let provider = PersistingProvider::new(http, store.clone());

    let cache = WeatherCache::mount(
        weather_options(&config.weather),
        Arc::new(store),
        Arc::new(provider),
    )
    .await
    .map_err(AppError::weather)?;

    print_snapshot(&cache.snapshot());

    if !cache.is_auto_refreshing() {
        return Ok(());
    }

    println!(
        "\nRefreshing every {} minutes. Press Ctrl-C to stop.",
        config.weather.refresh_interval_minutes
    );
    let mut updates = cache.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if !snapshot.is_loading {
                    print_snapshot(&snapshot);
                }
            }
        }
    }

    cache.stop_auto_refresh();
    tracing::info!("SkyHop weather stopped");
    Ok(())
}

fn weather_options(weather: &WeatherConfig) -> WeatherOptions {
    let mut options = WeatherOptions::new(weather.stations.iter().cloned())
        .with_freshness_window(Duration::from_secs(u64::from(weather.freshness_minutes) * 60));

    if let Some(location) = weather.location {
        options = options.with_location(GeoPoint::new(location.lat, location.lng));
    }
    if weather.auto_refresh {
        options = options.with_auto_refresh(u64::from(weather.refresh_interval_minutes));
    }

    options
}

fn print_snapshot(snapshot: &WeatherSnapshot) {
    println!(
        "\nAviation weather ({:?}, updated {})",
        snapshot.status,
        snapshot.age_display(Utc::now())
    );

    if let Some(error) = &snapshot.error {
        println!("  warning: {}", error);
    }
    if !snapshot.has_data() {
        println!("  no observations available");
        return;
    }

    for obs in snapshot.observations.iter() {
        let category = obs.flight_category.map(|c| c.as_str()).unwrap_or("----");
        let temperature = obs
            .temperature
            .map(|t| format!("{:.0}°F", t))
            .unwrap_or_else(|| "--".to_string());
        let wind = match (obs.wind_direction, obs.wind_speed) {
            (Some(dir), Some(speed)) => format!("{:03}@{:.0}kt", dir, speed),
            (None, Some(speed)) => format!("VRB@{:.0}kt", speed),
            _ => "calm".to_string(),
        };

        println!("  {:<5} {:<4} {:>5} {}", obs.station_id, category, temperature, wind);
    }
}
