//! Fetch, persistence and backup plumbing for the monitor.

mod backup;
mod fetch;
mod store;

pub use backup::{BackupError, BackupRotator, BACKUP_PREFIX};
pub use fetch::{
    parse_endpoint_list, EndpointPool, FetchError, FetchPath, FetchedResponse,
    HttpClientConfig, HttpFetcher, StaticEndpointPool,
};
pub use store::{ObservationStore, StoreError, TemperatureBucket, WeatherWriteSummary};

pub const CRATE_NAME: &str = "tfw-storage";
