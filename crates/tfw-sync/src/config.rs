use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tfw_adapters::DEFAULT_FLOW_ENDPOINT;
use tfw_core::GeoPoint;
use tfw_storage::{parse_endpoint_list, HttpClientConfig};
use thiserror::Error;

pub const API_KEY_VAR: &str = "TOMTOM_API_KEY";
pub const DEFAULT_ACTIVE_POINT: &str = "ozimska_reymonta";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; TfwMonitorBot/1.0)";
pub const DEFAULT_WEATHER_BASE_URL: &str = "https://www.timeanddate.com/weather";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOMTOM_API_KEY is not set; define it in the environment or in a .env file")]
    MissingCredential,
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("point registry {path}: {reason}")]
    PointsFile { path: PathBuf, reason: String },
    #[error("unknown traffic point {key:?} (known: {known})")]
    UnknownPoint { key: String, known: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrafficPoint {
    pub key: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub label: Option<String>,
}

impl TrafficPoint {
    fn builtin(key: &str, lat: f64, lon: f64, label: &str) -> Self {
        Self {
            key: key.to_string(),
            lat,
            lon,
            label: Some(label.to_string()),
        }
    }

    pub fn geo(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// Named measurement points; one of them is monitored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointRegistry {
    #[serde(default)]
    pub active: Option<String>,
    pub points: Vec<TrafficPoint>,
}

impl PointRegistry {
    pub fn builtin() -> Self {
        Self {
            active: Some(DEFAULT_ACTIVE_POINT.to_string()),
            points: vec![
                TrafficPoint::builtin("niemodlinska_most", 50.6691, 17.9073, "Niemodlinska street, Oder bridge"),
                TrafficPoint::builtin("ozimska_reymonta", 50.6685, 17.9375, "Ozimska / Reymonta junction"),
                TrafficPoint::builtin("wezel_opole_poludnie", 50.5323, 17.9180, "Opole Poludnie interchange (A4/DK45)"),
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::PointsFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        serde_yaml::from_str(&text).map_err(|err| ConfigError::PointsFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> Result<&TrafficPoint, ConfigError> {
        self.points
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| ConfigError::UnknownPoint {
                key: key.to_string(),
                known: self
                    .points
                    .iter()
                    .map(|p| p.key.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Everything the monitor needs, resolved once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub traffic_api_url: String,
    pub point: TrafficPoint,
    pub poll_interval: Duration,
    pub jam_alert_threshold: f64,
    pub backup_every_n_cycles: u32,
    pub backup_retention: usize,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub user_agent: String,
    pub proxy_pool: Vec<String>,
    pub weather_base_url: String,
    pub country_slug: String,
    pub city: String,
    pub history_year: i32,
    pub indirect_timeout: Duration,
    pub direct_timeout: Duration,
    pub api_timeout: Duration,
    pub robots_timeout: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"***")
            .field("traffic_api_url", &self.traffic_api_url)
            .field("point", &self.point)
            .field("poll_interval", &self.poll_interval)
            .field("jam_alert_threshold", &self.jam_alert_threshold)
            .field("backup_every_n_cycles", &self.backup_every_n_cycles)
            .field("backup_retention", &self.backup_retention)
            .field("db_path", &self.db_path)
            .field("backup_dir", &self.backup_dir)
            .field("user_agent", &self.user_agent)
            .field("proxy_pool", &self.proxy_pool.len())
            .field("weather_base_url", &self.weather_base_url)
            .field("country_slug", &self.country_slug)
            .field("city", &self.city)
            .field("history_year", &self.history_year)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let api_key = get(API_KEY_VAR).ok_or(ConfigError::MissingCredential)?;

        let registry = match get("TFW_POINTS_FILE") {
            Some(path) => PointRegistry::load(Path::new(&path))?,
            None => PointRegistry::builtin(),
        };
        let active = get("TFW_ACTIVE_POINT")
            .or_else(|| registry.active.clone())
            .unwrap_or_else(|| DEFAULT_ACTIVE_POINT.to_string());
        let point = registry.get(&active)?.clone();

        let backup_every_n_cycles: u32 = parsed(get("TFW_BACKUP_EVERY_N_CYCLES"), "TFW_BACKUP_EVERY_N_CYCLES", 4)?;
        if backup_every_n_cycles == 0 {
            return Err(invalid("TFW_BACKUP_EVERY_N_CYCLES", "0", "must be at least 1"));
        }
        let backup_retention: usize = parsed(get("TFW_BACKUP_RETENTION"), "TFW_BACKUP_RETENTION", 5)?;
        if backup_retention == 0 {
            return Err(invalid("TFW_BACKUP_RETENTION", "0", "must be at least 1"));
        }
        let jam_alert_threshold: f64 = parsed(get("TFW_JAM_ALERT_THRESHOLD"), "TFW_JAM_ALERT_THRESHOLD", 8.0)?;
        if !jam_alert_threshold.is_finite() {
            return Err(invalid(
                "TFW_JAM_ALERT_THRESHOLD",
                &jam_alert_threshold.to_string(),
                "must be a finite number",
            ));
        }

        Ok(Self {
            api_key,
            traffic_api_url: text("TFW_TRAFFIC_API_URL", DEFAULT_FLOW_ENDPOINT),
            point,
            poll_interval: seconds(get("TFW_POLL_INTERVAL_SECS"), "TFW_POLL_INTERVAL_SECS", 900)?,
            jam_alert_threshold,
            backup_every_n_cycles,
            backup_retention,
            db_path: PathBuf::from(text("TFW_DB_PATH", "db/traffic.db")),
            backup_dir: PathBuf::from(text("TFW_BACKUP_DIR", "backups")),
            user_agent: text("TFW_USER_AGENT", DEFAULT_USER_AGENT),
            proxy_pool: get("TFW_PROXY_POOL")
                .map(|raw| parse_endpoint_list(&raw))
                .unwrap_or_default(),
            weather_base_url: text("TFW_WEATHER_BASE_URL", DEFAULT_WEATHER_BASE_URL),
            country_slug: text("TFW_COUNTRY_SLUG", "poland"),
            city: text("TFW_CITY", "opole"),
            history_year: parsed(get("TFW_HISTORY_YEAR"), "TFW_HISTORY_YEAR", 2024)?,
            indirect_timeout: seconds(get("TFW_INDIRECT_TIMEOUT_SECS"), "TFW_INDIRECT_TIMEOUT_SECS", 5)?,
            direct_timeout: seconds(get("TFW_DIRECT_TIMEOUT_SECS"), "TFW_DIRECT_TIMEOUT_SECS", 20)?,
            api_timeout: seconds(get("TFW_API_TIMEOUT_SECS"), "TFW_API_TIMEOUT_SECS", 10)?,
            robots_timeout: seconds(get("TFW_ROBOTS_TIMEOUT_SECS"), "TFW_ROBOTS_TIMEOUT_SECS", 10)?,
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: Some(self.user_agent.clone()),
            indirect_timeout: self.indirect_timeout,
            direct_timeout: self.direct_timeout,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parsed<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|err: T::Err| invalid(key, &value, &err.to_string())),
    }
}

fn seconds(raw: Option<String>, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parsed(raw, key, default)?;
    if secs == 0 {
        return Err(invalid(key, "0", "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}
