use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use rand::Rng;
use tfw_adapters::WeatherSource;
use tfw_storage::WeatherWriteSummary;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::ingest::Ingestor;

/// Every calendar day of `year`, in order. Empty for years chrono cannot represent.
pub fn days_of_year(year: i32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    first.iter_days().take_while(|d| d.year() == year).collect()
}

/// Random pause between consecutive page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessDelay {
    pub min: Duration,
    pub max: Duration,
}

impl Default for PolitenessDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        }
    }
}

impl PolitenessDelay {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = (self.max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    /// Page fetched; rows (possibly none) went through deduplicating ingestion.
    Ingested(WeatherWriteSummary),
    /// Denied by policy or not retrievable.
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub year: i32,
    pub days_total: usize,
    pub days_attempted: usize,
    pub days_unavailable: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Day-by-day historic weather acquisition into the store.
pub struct WeatherAcquisition {
    source: Arc<dyn WeatherSource>,
    ingestor: Ingestor,
}

impl WeatherAcquisition {
    pub fn new(source: Arc<dyn WeatherSource>, ingestor: Ingestor) -> Self {
        Self { source, ingestor }
    }

    pub async fn acquire_day(&self, date: NaiveDate) -> DayOutcome {
        match self.source.fetch_day(date).await {
            Some(records) => {
                let summary = self.ingestor.ingest_weather(&records).await;
                info!(%date, rows = records.len(), inserted = summary.inserted, "weather day processed");
                DayOutcome::Ingested(summary)
            }
            None => {
                error!(%date, "weather day unavailable");
                DayOutcome::Unavailable
            }
        }
    }

    /// Acquire every day of `year`. One bad day never stops the run; the stop
    /// signal ends it after the current day.
    pub async fn backfill_year(
        &self,
        year: i32,
        delay: PolitenessDelay,
        shutdown: &CancellationToken,
    ) -> BackfillSummary {
        let days = days_of_year(year);
        let mut summary = BackfillSummary {
            year,
            days_total: days.len(),
            ..BackfillSummary::default()
        };
        info!(year, days = days.len(), "historic weather backfill started");

        for (index, date) in days.iter().copied().enumerate() {
            if shutdown.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let span = info_span!("backfill_day", %date, day = index + 1, of = days.len());
            let outcome = self.acquire_day(date).instrument(span).await;
            summary.days_attempted += 1;
            match outcome {
                DayOutcome::Ingested(day) => {
                    summary.inserted += day.inserted;
                    summary.duplicates += day.duplicates;
                    summary.failed += day.failed;
                }
                DayOutcome::Unavailable => summary.days_unavailable += 1,
            }

            if index + 1 < days.len() {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay.sample()) => {}
                }
            }
        }

        info!(
            year,
            attempted = summary.days_attempted,
            unavailable = summary.days_unavailable,
            inserted = summary.inserted,
            cancelled = summary.cancelled,
            "historic weather backfill finished"
        );
        summary
    }
}
