use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::Connection;
use tfw_core::{TrafficObservation, WeatherObservation};
use thiserror::Error;
use tracing::{debug, error};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS traffic (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        lat REAL NOT NULL,
        lon REAL NOT NULL,
        speed REAL,
        speed_limit REAL,
        jam_factor REAL,
        confidence REAL,
        provider TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS weather (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        lat REAL NOT NULL,
        lon REAL NOT NULL,
        temperature_c REAL,
        weather_desc TEXT,
        wind_speed REAL,
        wind_dir TEXT,
        humidity REAL,
        pressure REAL,
        visibility REAL,
        source TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_traffic_time ON traffic(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_weather_time ON weather(timestamp)",
];

const INSERT_TRAFFIC: &str = "INSERT INTO traffic (timestamp, lat, lon, speed, speed_limit, jam_factor, confidence, provider) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_WEATHER: &str = "INSERT INTO weather (timestamp, lat, lon, temperature_c, weather_desc, wind_speed, wind_dir, humidity, pressure, visibility, source) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const TEMPERATURE_BUCKETS: &str = r#"
    SELECT
        CASE
            WHEN w.temperature_c < 0 THEN '< 0°C'
            WHEN w.temperature_c BETWEEN 0 AND 10 THEN '0–10°C'
            WHEN w.temperature_c BETWEEN 10 AND 20 THEN '10–20°C'
            ELSE '> 20°C'
        END AS temp_bucket,
        AVG(t.jam_factor) AS avg_jam,
        COUNT(t.id) AS samples
    FROM traffic t
    LEFT JOIN weather w
      ON substr(t.timestamp, 1, 13) = substr(w.timestamp, 1, 13)
    WHERE w.temperature_c IS NOT NULL
    GROUP BY temp_bucket
    ORDER BY avg_jam DESC
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("preparing database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeatherWriteSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureBucket {
    pub label: String,
    pub avg_jam_factor: f64,
    pub samples: i64,
}

/// SQLite-backed observation tables.
///
/// Every operation opens its own connection and closes it before returning, so the
/// database file is never held open between cycles. Rollback journaling keeps the
/// single file a complete snapshot for backups.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl ObservationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        Self { path, options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        Ok(SqliteConnection::connect_with(&self.options).await?)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        conn.close().await?;
        Ok(())
    }

    /// All-or-nothing append of a traffic batch.
    pub async fn insert_traffic_batch(&self, records: &[TrafficObservation]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await?;
        let mut outcome = Ok(0usize);
        for record in records {
            if let Err(err) = insert_traffic_row(&mut *tx, record).await {
                outcome = Err(err);
                break;
            }
            outcome = outcome.map(|n| n + 1);
        }

        match outcome {
            Ok(written) => {
                tx.commit().await?;
                conn.close().await?;
                Ok(written)
            }
            Err(err) => {
                tx.rollback().await?;
                conn.close().await?;
                Err(err.into())
            }
        }
    }

    /// Per-row insert that skips any record whose timestamp is already stored.
    ///
    /// A failing row is logged and the remaining rows are still attempted; only a
    /// failure to open the connection is returned as an error.
    pub async fn insert_weather_deduplicated(
        &self,
        records: &[WeatherObservation],
    ) -> Result<WeatherWriteSummary, StoreError> {
        let mut summary = WeatherWriteSummary::default();
        if records.is_empty() {
            return Ok(summary);
        }

        let mut conn = self.connect().await?;
        for record in records {
            let timestamp = record.timestamp.to_string();
            match weather_exists(&mut conn, &timestamp).await {
                Ok(true) => {
                    debug!(%timestamp, "weather row already stored; skipping");
                    summary.duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    error!(%timestamp, error = %err, "weather duplicate check failed");
                    summary.failed += 1;
                    continue;
                }
            }
            match insert_weather_row(&mut conn, &timestamp, record).await {
                Ok(()) => summary.inserted += 1,
                Err(err) => {
                    error!(%timestamp, error = %err, "weather insert failed");
                    summary.failed += 1;
                }
            }
        }
        conn.close().await?;
        Ok(summary)
    }

    pub async fn count_traffic(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM traffic").await
    }

    pub async fn count_weather(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM weather").await
    }

    async fn count(&self, sql: &str) -> Result<i64, StoreError> {
        let mut conn = self.connect().await?;
        let n: i64 = sqlx::query_scalar(sql).fetch_one(&mut conn).await?;
        conn.close().await?;
        Ok(n)
    }

    /// Average jam factor per temperature band, joining both tables on the hour prefix.
    pub async fn temperature_buckets(&self) -> Result<Vec<TemperatureBucket>, StoreError> {
        let mut conn = self.connect().await?;
        let rows: Vec<(String, f64, i64)> = sqlx::query_as(TEMPERATURE_BUCKETS)
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;
        Ok(rows
            .into_iter()
            .map(|(label, avg_jam_factor, samples)| TemperatureBucket {
                label,
                avg_jam_factor,
                samples,
            })
            .collect())
    }
}

async fn insert_traffic_row(conn: &mut SqliteConnection, record: &TrafficObservation) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_TRAFFIC)
        .bind(record.timestamp_text())
        .bind(record.point.lat)
        .bind(record.point.lon)
        .bind(record.current_speed)
        .bind(record.free_flow_speed)
        .bind(record.jam_factor)
        .bind(record.confidence)
        .bind(&record.provider)
        .execute(conn)
        .await?;
    Ok(())
}

async fn weather_exists(conn: &mut SqliteConnection, timestamp: &str) -> Result<bool, sqlx::Error> {
    let hit: Option<i64> = sqlx::query_scalar("SELECT 1 FROM weather WHERE timestamp = ? LIMIT 1")
        .bind(timestamp)
        .fetch_optional(conn)
        .await?;
    Ok(hit.is_some())
}

async fn insert_weather_row(conn: &mut SqliteConnection, timestamp: &str, record: &WeatherObservation) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_WEATHER)
        .bind(timestamp)
        .bind(record.point.lat)
        .bind(record.point.lon)
        .bind(record.temperature_c)
        .bind(&record.description)
        .bind(record.wind_speed)
        .bind(&record.wind_dir)
        .bind(record.humidity)
        .bind(record.pressure)
        .bind(record.visibility)
        .bind(&record.source)
        .execute(conn)
        .await?;
    Ok(())
}
