use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// FAA flight category derived from ceiling and visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
}

impl FlightCategory {
    /// Classify from visibility (statute miles) and ceiling (feet AGL).
    ///
    /// The worse of the two readings wins; a missing reading doesn't
    /// restrict the category. Returns `None` when both are missing.
    pub fn from_conditions(visibility_sm: Option<f64>, ceiling_ft: Option<u32>) -> Option<Self> {
        if visibility_sm.is_none() && ceiling_ft.is_none() {
            return None;
        }

        let by_ceiling = match ceiling_ft {
            Some(c) if c < 500 => Self::Lifr,
            Some(c) if c < 1000 => Self::Ifr,
            Some(c) if c <= 3000 => Self::Mvfr,
            _ => Self::Vfr,
        };
        let by_visibility = match visibility_sm {
            Some(v) if v < 1.0 => Self::Lifr,
            Some(v) if v < 3.0 => Self::Ifr,
            Some(v) if v <= 5.0 => Self::Mvfr,
            _ => Self::Vfr,
        };

        Some(by_ceiling.max(by_visibility))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vfr => "VFR",
            Self::Mvfr => "MVFR",
            Self::Ifr => "IFR",
            Self::Lifr => "LIFR",
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Vfr => "Visual flight rules",
            Self::Mvfr => "Marginal visual flight rules",
            Self::Ifr => "Instrument flight rules",
            Self::Lifr => "Low instrument flight rules",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Vfr => 0,
            Self::Mvfr => 1,
            Self::Ifr => 2,
            Self::Lifr => 3,
        }
    }
}

impl PartialOrd for FlightCategory {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by severity: VFR < MVFR < IFR < LIFR.
impl Ord for FlightCategory {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl std::fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VFR" => Ok(Self::Vfr),
            "MVFR" => Ok(Self::Mvfr),
            "IFR" => Ok(Self::Ifr),
            "LIFR" => Ok(Self::Lifr),
            other => Err(format!("unknown flight category: {}", other)),
        }
    }
}

/// Upstream reports occasionally carry categories we don't know; treat them as absent.
fn lenient_category<'de, D>(deserializer: D) -> Result<Option<FlightCategory>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Geographic point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A single weather report for one station.
///
/// Observations are never edited in place: a refresh produces new values and
/// the cache swaps whole result sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    /// When the report was issued by the station
    #[serde(default, alias = "observation_time")]
    pub captured_at: Option<DateTime<Utc>>,
    /// When this row was persisted or refreshed
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_category")]
    pub flight_category: Option<FlightCategory>,
    /// Degrees Fahrenheit
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub dewpoint: Option<f64>,
    /// Knots
    #[serde(default)]
    pub wind_speed: Option<f64>,
    /// Degrees true
    #[serde(default)]
    pub wind_direction: Option<u16>,
    #[serde(default)]
    pub wind_gust: Option<f64>,
    /// Statute miles
    #[serde(default)]
    pub visibility: Option<f64>,
    /// Feet AGL
    #[serde(default)]
    pub ceiling: Option<u32>,
    /// Inches of mercury
    #[serde(default)]
    pub altimeter: Option<f64>,
    /// Raw METAR text
    #[serde(default, alias = "raw_metar")]
    pub raw_text: Option<String>,
}

impl Observation {
    /// Create an observation with only the required fields set.
    pub fn new(station_id: impl Into<String>, last_updated: DateTime<Utc>) -> Self {
        Self {
            station_id: station_id.into(),
            captured_at: None,
            last_updated,
            flight_category: None,
            temperature: None,
            dewpoint: None,
            wind_speed: None,
            wind_direction: None,
            wind_gust: None,
            visibility: None,
            ceiling: None,
            altimeter: None,
            raw_text: None,
        }
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    pub fn with_flight_category(mut self, category: FlightCategory) -> Self {
        self.flight_category = Some(category);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_wind(mut self, speed_kt: f64, direction: Option<u16>) -> Self {
        self.wind_speed = Some(speed_kt);
        self.wind_direction = direction;
        self
    }

    pub fn with_raw_text(mut self, raw: impl Into<String>) -> Self {
        self.raw_text = Some(raw.into());
        self
    }

    /// Set visibility/ceiling and fill in the flight category if none was reported.
    pub fn with_conditions(mut self, visibility_sm: Option<f64>, ceiling_ft: Option<u32>) -> Self {
        self.visibility = visibility_sm;
        self.ceiling = ceiling_ft;
        if self.flight_category.is_none() {
            self.flight_category = FlightCategory::from_conditions(visibility_sm, ceiling_ft);
        }
        self
    }
}

/// Normalized description of what a cache instance is watching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherQuery {
    pub stations: Vec<String>,
    pub location: Option<GeoPoint>,
}

impl WeatherQuery {
    /// Trim, upper-case and de-duplicate station ids, keeping first-seen order.
    pub fn new<I, S>(stations: I, location: Option<GeoPoint>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for station in stations {
            let id = station.as_ref().trim().to_ascii_uppercase();
            if !id.is_empty() && !normalized.contains(&id) {
                normalized.push(id);
            }
        }

        Self {
            stations: normalized,
            location,
        }
    }

    /// Nothing to ask any collaborator about.
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty() && self.location.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_ceiling() {
        assert_eq!(FlightCategory::from_conditions(None, Some(300)), Some(FlightCategory::Lifr));
        assert_eq!(FlightCategory::from_conditions(None, Some(800)), Some(FlightCategory::Ifr));
        assert_eq!(FlightCategory::from_conditions(None, Some(3000)), Some(FlightCategory::Mvfr));
        assert_eq!(FlightCategory::from_conditions(None, Some(3500)), Some(FlightCategory::Vfr));
    }

    #[test]
    fn test_category_from_visibility() {
        assert_eq!(FlightCategory::from_conditions(Some(0.5), None), Some(FlightCategory::Lifr));
        assert_eq!(FlightCategory::from_conditions(Some(2.0), None), Some(FlightCategory::Ifr));
        assert_eq!(FlightCategory::from_conditions(Some(5.0), None), Some(FlightCategory::Mvfr));
        assert_eq!(FlightCategory::from_conditions(Some(10.0), None), Some(FlightCategory::Vfr));
    }

    #[test]
    fn test_category_worse_reading_wins() {
        assert_eq!(
            FlightCategory::from_conditions(Some(10.0), Some(700)),
            Some(FlightCategory::Ifr)
        );
        assert_eq!(
            FlightCategory::from_conditions(Some(0.25), Some(5000)),
            Some(FlightCategory::Lifr)
        );
    }

    #[test]
    fn test_category_unknown_without_readings() {
        assert_eq!(FlightCategory::from_conditions(None, None), None);
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("mvfr".parse::<FlightCategory>(), Ok(FlightCategory::Mvfr));
        assert_eq!(" LIFR ".parse::<FlightCategory>(), Ok(FlightCategory::Lifr));
        assert!("SVFR".parse::<FlightCategory>().is_err());
    }

    #[test]
    fn test_observation_deserializes_upstream_row() {
        let json = serde_json::json!({
            "id": "3f1c",
            "station_id": "KPHX",
            "flight_category": "VFR",
            "temperature": 98.6,
            "wind_speed": 7,
            "observation_time": "2026-10-16T18:51:00Z",
            "last_updated": "2026-10-16T18:55:00Z",
            "raw_metar": "KPHX 161851Z 27007KT 10SM CLR 37/M02 A2990"
        });

        let obs: Observation = serde_json::from_value(json).unwrap();
        assert_eq!(obs.station_id, "KPHX");
        assert_eq!(obs.flight_category, Some(FlightCategory::Vfr));
        assert_eq!(obs.wind_speed, Some(7.0));
        assert!(obs.captured_at.is_some());
        assert!(obs.raw_text.as_deref().unwrap_or_default().starts_with("KPHX"));
        assert_eq!(obs.ceiling, None);
    }

    #[test]
    fn test_unknown_category_is_absent() {
        let json = serde_json::json!({
            "station_id": "KSFO",
            "flight_category": "UNKN",
            "last_updated": "2026-10-16T18:55:00Z"
        });

        let obs: Observation = serde_json::from_value(json).unwrap();
        assert_eq!(obs.flight_category, None);
    }

    #[test]
    fn test_with_conditions_keeps_reported_category() {
        let now = Utc::now();
        let reported = Observation::new("KSFO", now)
            .with_flight_category(FlightCategory::Mvfr)
            .with_conditions(Some(10.0), None);
        assert_eq!(reported.flight_category, Some(FlightCategory::Mvfr));

        let derived = Observation::new("KSFO", now).with_conditions(Some(2.0), Some(1500));
        assert_eq!(derived.flight_category, Some(FlightCategory::Ifr));
    }

    #[test]
    fn test_query_normalizes_stations() {
        let query = WeatherQuery::new([" klax", "KSFO", "", "KLAX", "ksfo "], None);
        assert_eq!(query.stations, vec!["KLAX".to_string(), "KSFO".to_string()]);
        assert!(!query.is_empty());
    }

    #[test]
    fn test_query_empty_only_without_location() {
        let none: [&str; 0] = [];
        assert!(WeatherQuery::new(none, None).is_empty());
        assert!(!WeatherQuery::new(none, Some(GeoPoint::new(33.9, -118.4))).is_empty());
    }

    #[test]
    fn test_geo_point_bounds() {
        assert!(GeoPoint::new(33.94, -118.41).is_valid());
        assert!(!GeoPoint::new(95.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
    }
}
