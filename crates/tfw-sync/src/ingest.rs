use tfw_core::{TrafficObservation, WeatherObservation};
use tfw_storage::{ObservationStore, WeatherWriteSummary};
use tracing::{error, info};

/// Writes observations and absorbs storage failures into counts, so a failed
/// write never takes the caller down.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: ObservationStore,
}

impl Ingestor {
    pub fn new(store: ObservationStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    /// All rows or none; returns the number written.
    pub async fn ingest_traffic(&self, records: &[TrafficObservation]) -> usize {
        match self.store.insert_traffic_batch(records).await {
            Ok(written) => {
                if written > 0 {
                    info!(written, "traffic records saved");
                }
                written
            }
            Err(err) => {
                error!(error = %err, records = records.len(), "traffic batch rolled back");
                0
            }
        }
    }

    pub async fn ingest_weather(&self, records: &[WeatherObservation]) -> WeatherWriteSummary {
        match self.store.insert_weather_deduplicated(records).await {
            Ok(summary) => {
                info!(
                    inserted = summary.inserted,
                    duplicates = summary.duplicates,
                    failed = summary.failed,
                    "weather records processed"
                );
                summary
            }
            Err(err) => {
                error!(error = %err, records = records.len(), "weather write failed");
                WeatherWriteSummary {
                    failed: records.len(),
                    ..WeatherWriteSummary::default()
                }
            }
        }
    }
}
