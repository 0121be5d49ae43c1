//! Core observation model for the traffic-flow and weather monitor.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tfw-core";

/// Provider tag stored with every flow-segment observation.
pub const TRAFFIC_PROVIDER: &str = "tomtom_flow";

/// Source tag stored with every scraped weather observation.
pub const WEATHER_SOURCE: &str = "timeanddate_html";

/// Substitute for a missing or zero current speed when deriving the jam factor.
///
/// Keeps an unknown speed from reading as a perfectly free-flowing road; with a
/// free-flow speed of 40 km/h the score becomes 9.975 rather than 10.0.
pub const MISSING_SPEED_SUBSTITUTE: f64 = 0.1;

pub const JAM_FACTOR_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Derived 0-10 congestion score.
///
/// Zero whenever the free-flow speed is absent or not positive.
pub fn congestion_score(current_speed: Option<f64>, free_flow_speed: Option<f64>) -> f64 {
    match free_flow_speed {
        Some(free_flow) if free_flow > 0.0 => {
            let current = current_speed
                .filter(|speed| *speed != 0.0)
                .unwrap_or(MISSING_SPEED_SUBSTITUTE);
            JAM_FACTOR_MAX * (1.0 - current / free_flow).max(0.0)
        }
        _ => 0.0,
    }
}

/// One flow-segment reading. Append-only once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficObservation {
    pub observed_at: DateTime<Utc>,
    pub point: GeoPoint,
    pub current_speed: Option<f64>,
    pub free_flow_speed: Option<f64>,
    pub jam_factor: f64,
    pub confidence: f64,
    pub provider: String,
}

impl TrafficObservation {
    pub fn from_flow(
        observed_at: DateTime<Utc>,
        point: GeoPoint,
        current_speed: Option<f64>,
        free_flow_speed: Option<f64>,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            observed_at,
            point,
            current_speed,
            free_flow_speed,
            jam_factor: congestion_score(current_speed, free_flow_speed),
            confidence: confidence.unwrap_or(0.0),
            provider: TRAFFIC_PROVIDER.to_string(),
        }
    }

    /// Storage form of the timestamp: RFC 3339, whole seconds, `+00:00` offset.
    pub fn timestamp_text(&self) -> String {
        self.observed_at.to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

/// Minute-precision weather time rendered with a trailing `Z`.
///
/// The wrapped value is the local wall-clock time printed by the weather page.
/// No offset conversion happens, so the `Z` is a label only: rows joined against
/// traffic timestamps (true UTC) are shifted by the local offset. Existing stored
/// data relies on this convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WeatherTimestamp(NaiveDateTime);

impl WeatherTimestamp {
    pub fn from_local(local: NaiveDateTime) -> Self {
        Self(local)
    }

    /// Combine an acquisition date with a `HH:MM` time token.
    pub fn parse_on(date: NaiveDate, time_token: &str) -> Option<Self> {
        let text = format!("{} {}", date.format("%Y-%m-%d"), time_token);
        NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M")
            .ok()
            .map(Self)
    }

    pub fn local(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for WeatherTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Z", self.0.format("%Y-%m-%dT%H:%M"))
    }
}

/// One row of the historic weather table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub timestamp: WeatherTimestamp,
    pub point: GeoPoint,
    pub temperature_c: Option<f64>,
    pub description: String,
    pub wind_speed: Option<f64>,
    /// The source table carries direction only as an icon; always empty.
    pub wind_dir: String,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn score_for_known_speed_pairs() {
        assert!(close(congestion_score(Some(20.0), Some(50.0)), 6.0));
        assert!(close(congestion_score(None, Some(40.0)), 9.975));
        assert!(close(congestion_score(Some(0.0), Some(40.0)), 9.975));
    }

    #[test]
    fn score_is_zero_without_positive_free_flow() {
        assert_eq!(congestion_score(Some(30.0), None), 0.0);
        assert_eq!(congestion_score(Some(30.0), Some(0.0)), 0.0);
        assert_eq!(congestion_score(None, Some(-5.0)), 0.0);
    }

    #[test]
    fn score_stays_within_bounds() {
        for free_flow in [1.0, 13.5, 50.0, 120.0] {
            for step in 0..=300 {
                let current = step as f64 * 0.5;
                let score = congestion_score(Some(current), Some(free_flow));
                assert!((0.0..=JAM_FACTOR_MAX).contains(&score), "{current}/{free_flow} -> {score}");
            }
            assert_eq!(congestion_score(Some(free_flow), Some(free_flow)), 0.0);
            assert!(congestion_score(Some(free_flow * 1e-6), Some(free_flow)) > 9.99);
        }
    }

    #[test]
    fn traffic_observation_defaults_confidence() {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 7, 30, 15).single().unwrap();
        let obs = TrafficObservation::from_flow(at, GeoPoint::new(50.6685, 17.9375), Some(20.0), Some(50.0), None);
        assert_eq!(obs.confidence, 0.0);
        assert_eq!(obs.provider, TRAFFIC_PROVIDER);
        assert_eq!(obs.timestamp_text(), "2024-05-02T07:30:15+00:00");
    }

    #[test]
    fn weather_timestamp_keeps_literal_utc_marker() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let ts = WeatherTimestamp::parse_on(date, "14:20").unwrap();
        assert_eq!(ts.to_string(), "2024-05-02T14:20Z");
        assert!(WeatherTimestamp::parse_on(date, "noon").is_none());
    }
}
