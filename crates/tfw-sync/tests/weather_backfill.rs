use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::tempdir;
use tfw_adapters::WeatherSource;
use tfw_core::{GeoPoint, WeatherObservation, WeatherTimestamp, WEATHER_SOURCE};
use tfw_storage::ObservationStore;
use tfw_sync::{DayOutcome, Ingestor, PolitenessDelay, WeatherAcquisition};
use tokio_util::sync::CancellationToken;

/// Two readings per day; one configured day is unavailable.
struct SyntheticDays {
    missing: Option<NaiveDate>,
    calls: AtomicUsize,
    stop_after: Option<(usize, CancellationToken)>,
}

impl SyntheticDays {
    fn new(missing: Option<NaiveDate>) -> Self {
        Self {
            missing,
            calls: AtomicUsize::new(0),
            stop_after: None,
        }
    }
}

fn reading(date: NaiveDate, time: &str, temperature: f64) -> WeatherObservation {
    WeatherObservation {
        timestamp: WeatherTimestamp::parse_on(date, time).unwrap(),
        point: GeoPoint::new(50.6685, 17.9375),
        temperature_c: Some(temperature),
        description: "Passing clouds.".to_string(),
        wind_speed: Some(11.0),
        wind_dir: String::new(),
        humidity: Some(64.0),
        pressure: Some(1016.0),
        visibility: Some(16.0),
        source: WEATHER_SOURCE.to_string(),
    }
}

#[async_trait]
impl WeatherSource for SyntheticDays {
    async fn fetch_day(&self, date: NaiveDate) -> Option<Vec<WeatherObservation>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.stop_after {
            if call == *after {
                token.cancel();
            }
        }
        if Some(date) == self.missing {
            return None;
        }
        Some(vec![reading(date, "06:20", 4.0), reading(date, "18:20", 12.5)])
    }
}

async fn store(dir: &tempfile::TempDir) -> ObservationStore {
    let store = ObservationStore::new(dir.path().join("traffic.db"));
    store.init_schema().await.unwrap();
    store
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn same_day_twice_stores_each_timestamp_once() {
    let dir = tempdir().unwrap();
    let store = store(&dir).await;
    let acquisition = WeatherAcquisition::new(
        Arc::new(SyntheticDays::new(None)),
        Ingestor::new(store.clone()),
    );

    let first = acquisition.acquire_day(date(2024, 5, 2)).await;
    let second = acquisition.acquire_day(date(2024, 5, 2)).await;

    assert!(matches!(first, DayOutcome::Ingested(s) if s.inserted == 2 && s.duplicates == 0));
    assert!(matches!(second, DayOutcome::Ingested(s) if s.inserted == 0 && s.duplicates == 2));
    assert_eq!(store.count_weather().await.unwrap(), 2);
}

#[tokio::test]
async fn leap_year_backfill_survives_an_unavailable_day() {
    let dir = tempdir().unwrap();
    let store = store(&dir).await;
    let acquisition = WeatherAcquisition::new(
        Arc::new(SyntheticDays::new(Some(date(2024, 2, 29)))),
        Ingestor::new(store.clone()),
    );

    let summary = acquisition
        .backfill_year(2024, PolitenessDelay::none(), &CancellationToken::new())
        .await;

    assert_eq!(summary.days_total, 366);
    assert_eq!(summary.days_attempted, 366);
    assert_eq!(summary.days_unavailable, 1);
    assert_eq!(summary.inserted, 365 * 2);
    assert!(!summary.cancelled);
    assert_eq!(store.count_weather().await.unwrap(), 730);
}

#[tokio::test]
async fn stop_signal_ends_backfill_after_the_current_day() {
    let dir = tempdir().unwrap();
    let store = store(&dir).await;
    let token = CancellationToken::new();
    let source = SyntheticDays {
        stop_after: Some((3, token.clone())),
        ..SyntheticDays::new(None)
    };
    let acquisition = WeatherAcquisition::new(Arc::new(source), Ingestor::new(store.clone()));

    let summary = acquisition
        .backfill_year(2023, PolitenessDelay::none(), &token)
        .await;

    assert!(summary.cancelled);
    assert_eq!(summary.days_total, 365);
    assert_eq!(summary.days_attempted, 3);
    assert_eq!(store.count_weather().await.unwrap(), 6);
}
