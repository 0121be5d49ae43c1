use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tfw_core::{GeoPoint, TrafficObservation};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CongestionAlert {
    pub observed_at: DateTime<Utc>,
    pub point: GeoPoint,
    pub jam_factor: f64,
}

impl CongestionAlert {
    pub fn message(&self) -> String {
        format!(
            "ALERT: heavy congestion at {}, jam factor {:.2}",
            self.point, self.jam_factor
        )
    }
}

/// Flags every record at or above `threshold`; the rest are logged as normal.
pub fn evaluate_alerts(records: &[TrafficObservation], threshold: f64) -> Vec<CongestionAlert> {
    let mut alerts = Vec::new();
    for record in records {
        let (lat, lon, jam_factor) = (record.point.lat, record.point.lon, record.jam_factor);
        if jam_factor >= threshold {
            warn!(lat, lon, jam_factor, threshold, "congestion alert");
            alerts.push(CongestionAlert {
                observed_at: record.observed_at,
                point: record.point,
                jam_factor,
            });
        } else {
            info!(lat, lon, jam_factor, "traffic within normal range");
        }
    }
    alerts
}

/// Operator-facing channel for alerts and lifecycle milestones.
pub trait AlertHook: Send + Sync {
    fn congestion(&self, alert: &CongestionAlert);
    fn milestone(&self, message: &str);
}

#[derive(Debug, Default)]
pub struct ConsoleAlertHook;

impl AlertHook for ConsoleAlertHook {
    fn congestion(&self, alert: &CongestionAlert) {
        println!("{}", alert.message());
    }

    fn milestone(&self, message: &str) {
        println!("{message}");
    }
}

/// Keeps everything it is told; used to observe the loop from tests.
#[derive(Debug, Default)]
pub struct RecordingAlertHook {
    alerts: Mutex<Vec<CongestionAlert>>,
    milestones: Mutex<Vec<String>>,
}

impl RecordingAlertHook {
    pub fn alerts(&self) -> Vec<CongestionAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn milestones(&self) -> Vec<String> {
        self.milestones.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl AlertHook for RecordingAlertHook {
    fn congestion(&self, alert: &CongestionAlert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }

    fn milestone(&self, message: &str) {
        if let Ok(mut milestones) = self.milestones.lock() {
            milestones.push(message.to_string());
        }
    }
}
