//! Orchestration: configuration, the polling loop, weather backfill and reports.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tfw_adapters::{
    ComplianceGate, PolicyVerdict, TrafficAdapter, TrafficApiConfig, WeatherAdapter,
    WeatherSiteConfig, WeatherTableParser,
};
use tfw_storage::{BackupRotator, HttpFetcher, ObservationStore, StaticEndpointPool};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod alerts;
mod config;
mod ingest;
mod report;
mod scheduler;
mod weather;

pub use alerts::{evaluate_alerts, AlertHook, CongestionAlert, ConsoleAlertHook, RecordingAlertHook};
pub use config::{
    AppConfig, ConfigError, PointRegistry, TrafficPoint, API_KEY_VAR, DEFAULT_ACTIVE_POINT,
    DEFAULT_USER_AGENT, DEFAULT_WEATHER_BASE_URL,
};
pub use ingest::Ingestor;
pub use report::{render_temperature_report, temperature_report};
pub use scheduler::{CycleReport, CycleState, LoopSettings, LoopSummary, MaintenanceLoop};
pub use weather::{days_of_year, BackfillSummary, DayOutcome, PolitenessDelay, WeatherAcquisition};

pub const CRATE_NAME: &str = "tfw-sync";

/// Components built from one [`AppConfig`].
pub struct Monitor {
    config: AppConfig,
    http: Arc<HttpFetcher>,
    store: ObservationStore,
}

impl Monitor {
    pub fn new(config: AppConfig) -> Result<Self> {
        let pool = Arc::new(StaticEndpointPool::new(config.proxy_pool.clone()));
        let http = HttpFetcher::new(config.http_client_config(), pool).context("building http client")?;
        let store = ObservationStore::new(config.db_path.clone());
        Ok(Self {
            config,
            http: Arc::new(http),
            store,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn backup_rotator(&self) -> BackupRotator {
        BackupRotator::new(
            self.config.db_path.clone(),
            self.config.backup_dir.clone(),
            self.config.backup_retention,
        )
    }

    pub fn compliance_gate(&self) -> ComplianceGate {
        ComplianceGate::new(
            Arc::clone(&self.http),
            self.config.user_agent.clone(),
            self.config.robots_timeout,
        )
    }

    pub fn traffic_adapter(&self) -> TrafficAdapter {
        TrafficAdapter::new(
            Arc::clone(&self.http),
            TrafficApiConfig {
                endpoint: self.config.traffic_api_url.clone(),
                api_key: self.config.api_key.clone(),
                point: self.config.point.geo(),
                timeout: self.config.api_timeout,
            },
        )
    }

    pub fn weather_adapter(&self) -> WeatherAdapter {
        WeatherAdapter::new(
            Arc::clone(&self.http),
            self.compliance_gate(),
            WeatherSiteConfig {
                base_url: self.config.weather_base_url.clone(),
                country_slug: self.config.country_slug.clone(),
                city: self.config.city.clone(),
            },
            WeatherTableParser::new(self.config.point.geo()),
        )
    }

    pub fn weather_acquisition(&self) -> WeatherAcquisition {
        WeatherAcquisition::new(
            Arc::new(self.weather_adapter()),
            Ingestor::new(self.store.clone()),
        )
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            poll_interval: self.config.poll_interval,
            jam_alert_threshold: self.config.jam_alert_threshold,
            backup_every_n_cycles: self.config.backup_every_n_cycles,
        }
    }

    pub async fn init_db(&self) -> Result<()> {
        self.store
            .init_schema()
            .await
            .with_context(|| format!("initializing schema in {}", self.store.path().display()))?;
        info!(db = %self.store.path().display(), "database ready");
        Ok(())
    }

    /// Schema first, then the polling loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken, hook: Arc<dyn AlertHook>) -> Result<LoopSummary> {
        self.init_db().await?;
        info!(
            point = %self.config.point.key,
            lat = self.config.point.lat,
            lon = self.config.point.lon,
            "monitoring traffic point"
        );
        let scheduler = MaintenanceLoop::new(
            Arc::new(self.traffic_adapter()),
            Ingestor::new(self.store.clone()),
            self.backup_rotator(),
            self.loop_settings(),
        )
        .with_alert_hook(hook);
        Ok(scheduler.run(shutdown).await)
    }

    pub async fn weather_day(&self, date: NaiveDate) -> Result<DayOutcome> {
        self.init_db().await?;
        Ok(self.weather_acquisition().acquire_day(date).await)
    }

    pub async fn weather_year(&self, year: i32, shutdown: &CancellationToken) -> Result<BackfillSummary> {
        self.init_db().await?;
        Ok(self
            .weather_acquisition()
            .backfill_year(year, PolitenessDelay::default(), shutdown)
            .await)
    }

    pub async fn backup(&self) -> Option<PathBuf> {
        self.backup_rotator().rotate().await
    }

    pub async fn check_robots(&self, url: &str) -> PolicyVerdict {
        self.compliance_gate().check(url).await
    }

    pub async fn temperature_report(&self) -> Result<String> {
        temperature_report(&self.store)
            .await
            .context("building temperature report")
    }
}
