//! Source adapters: the flow-segment API client, the historic weather page scraper
//! and the robots-policy gate in front of it.

use async_trait::async_trait;
use chrono::NaiveDate;
use tfw_core::{TrafficObservation, WeatherObservation};
use thiserror::Error;

mod robots;
mod traffic;
mod weather;

pub use robots::{robots_url_for, ComplianceGate, PolicyVerdict, RobotsPolicy};
pub use traffic::{extract_flow, TrafficAdapter, TrafficApiConfig, DEFAULT_FLOW_ENDPOINT};
pub use weather::{
    cell_text, day_url, default_table_locators, parse_float, ColumnLayout, TableById,
    TableByHeaderToken, TableLocator, WeatherAdapter, WeatherSiteConfig, WeatherTableParser,
    MIN_DATA_CELLS, TEMPERATURE_HEADER_TOKEN, WEATHER_TABLE_ID,
};

pub const CRATE_NAME: &str = "tfw-adapters";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid css selector {0}")]
    Selector(String),
}

/// Current congestion for the active point. Failures are logged by the
/// implementation and surface as an empty batch.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    async fn fetch_current(&self) -> Vec<TrafficObservation>;
}

/// Historic observations for one calendar day.
///
/// `None` means nothing could be fetched (policy denial or transport failure);
/// `Some(vec![])` means the page was fetched but held no usable rows.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_day(&self, date: NaiveDate) -> Option<Vec<WeatherObservation>>;
}
