use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tfw_adapters::TrafficSource;
use tfw_storage::BackupRotator;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alerts::{evaluate_alerts, AlertHook, ConsoleAlertHook};
use crate::ingest::Ingestor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Evaluating,
    Maintaining,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub jam_alert_threshold: f64,
    pub backup_every_n_cycles: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub fetched: usize,
    pub written: usize,
    pub alerts: usize,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub final_backup: Option<PathBuf>,
}

/// The polling loop: fetch, ingest, evaluate alerts, rotate backups on a cycle
/// cadence, sleep. One cycle runs to completion before the next starts.
pub struct MaintenanceLoop {
    source: Arc<dyn TrafficSource>,
    ingestor: Ingestor,
    backups: BackupRotator,
    hook: Arc<dyn AlertHook>,
    settings: LoopSettings,
    state: CycleState,
    cycles_since_backup: u32,
    completed_cycles: u64,
}

impl MaintenanceLoop {
    pub fn new(
        source: Arc<dyn TrafficSource>,
        ingestor: Ingestor,
        backups: BackupRotator,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            ingestor,
            backups,
            hook: Arc::new(ConsoleAlertHook),
            settings,
            state: CycleState::Idle,
            cycles_since_backup: 0,
            completed_cycles: 0,
        }
    }

    pub fn with_alert_hook(mut self, hook: Arc<dyn AlertHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Cycles since the last scheduled backup.
    pub fn cycle_counter(&self) -> u32 {
        self.cycles_since_backup
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("cycle", %run_id, cycle = self.completed_cycles + 1);
        self.cycle(run_id).instrument(span).await
    }

    async fn cycle(&mut self, run_id: Uuid) -> CycleReport {
        info!("cycle started");
        let mut report = CycleReport {
            run_id,
            fetched: 0,
            written: 0,
            alerts: 0,
            backup: None,
        };

        self.state = CycleState::Fetching;
        let records = self.source.fetch_current().await;
        report.fetched = records.len();

        if records.is_empty() {
            warn!("no traffic data this cycle");
        } else {
            report.written = self.ingestor.ingest_traffic(&records).await;

            self.state = CycleState::Evaluating;
            let alerts = evaluate_alerts(&records, self.settings.jam_alert_threshold);
            for alert in &alerts {
                self.hook.congestion(alert);
            }
            report.alerts = alerts.len();
        }

        self.state = CycleState::Maintaining;
        self.cycles_since_backup += 1;
        if self.cycles_since_backup >= self.settings.backup_every_n_cycles {
            info!(cycles = self.cycles_since_backup, "running scheduled backup");
            report.backup = self.backups.rotate().await;
            self.cycles_since_backup = 0;
        }

        self.completed_cycles += 1;
        self.state = CycleState::Idle;
        report
    }

    /// Runs cycles until `shutdown` fires, then takes one last backup.
    ///
    /// Cancellation interrupts the sleep between cycles; a cycle already in
    /// progress is allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) -> LoopSummary {
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            threshold = self.settings.jam_alert_threshold,
            backup_every = self.settings.backup_every_n_cycles,
            "monitor started"
        );
        self.hook.milestone("Monitor started. Press Ctrl+C to stop.");

        while !shutdown.is_cancelled() {
            self.run_cycle().await;

            self.state = CycleState::Sleeping;
            info!(secs = self.settings.poll_interval.as_secs(), "sleeping until next cycle");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!("stop signal received; taking safety backup before exit");
        let final_backup = self.backups.rotate().await;
        self.state = CycleState::Stopped;
        info!(cycles = self.completed_cycles, "monitor stopped cleanly");
        self.hook.milestone("Goodbye!");

        LoopSummary {
            cycles: self.completed_cycles,
            final_backup,
        }
    }
}
