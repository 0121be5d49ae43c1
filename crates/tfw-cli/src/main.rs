use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tfw_adapters::PolicyVerdict;
use tfw_sync::{AppConfig, ConsoleAlertHook, DayOutcome, Monitor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "app.log";

#[derive(Debug, Parser)]
#[command(name = "tfw")]
#[command(about = "Traffic flow and weather monitor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll traffic until interrupted (default).
    Run,
    /// Create the database tables and indexes.
    InitDb,
    /// Scrape and store historic weather for one day.
    WeatherDay {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Scrape and store historic weather for every day of a year.
    WeatherYear {
        /// Defaults to TFW_HISTORY_YEAR.
        #[arg(long)]
        year: Option<i32>,
    },
    /// Snapshot the database now.
    Backup,
    /// Show the robots policy verdict for a URL.
    CheckRobots {
        #[arg(long)]
        url: String,
    },
    /// Average congestion per temperature band.
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(Path::new(LOG_DIR));

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;
    let monitor = Monitor::new(config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));
            let summary = monitor.run(shutdown, Arc::new(ConsoleAlertHook)).await?;
            info!(cycles = summary.cycles, "run complete");
        }
        Commands::InitDb => {
            monitor.init_db().await?;
            println!("database initialized: {}", monitor.store().path().display());
        }
        Commands::WeatherDay { date } => match monitor.weather_day(date).await? {
            DayOutcome::Ingested(summary) => println!(
                "{date}: inserted={} duplicates={} failed={}",
                summary.inserted, summary.duplicates, summary.failed
            ),
            DayOutcome::Unavailable => println!("{date}: no data retrieved"),
        },
        Commands::WeatherYear { year } => {
            let year = year.unwrap_or(monitor.config().history_year);
            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));
            let summary = monitor.weather_year(year, &shutdown).await?;
            println!(
                "{year}: days={}/{} unavailable={} inserted={} duplicates={}{}",
                summary.days_attempted,
                summary.days_total,
                summary.days_unavailable,
                summary.inserted,
                summary.duplicates,
                if summary.cancelled { " (interrupted)" } else { "" }
            );
        }
        Commands::Backup => match monitor.backup().await {
            Some(path) => println!("backup created: {}", path.display()),
            None => println!("no backup created (see log)"),
        },
        Commands::CheckRobots { url } => match monitor.check_robots(&url).await {
            PolicyVerdict::Allowed => println!("allowed: {url}"),
            PolicyVerdict::Denied => println!("denied: {url}"),
            PolicyVerdict::Undetermined(reason) => {
                println!("undetermined (treated as allowed): {url}: {reason}")
            }
        },
        Commands::Report => println!("{}", monitor.temperature_report().await?),
    }

    Ok(())
}

/// Console output plus a plain-text copy appended to `<dir>/app.log`.
fn init_tracing(dir: &Path) {
    let (file_layer, file_error) = match open_log_file(dir) {
        Ok(file) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        Err(err) => (None, Some(err)),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tfw=info")))
        .with(fmt::layer())
        .with(file_layer)
        .init();
    if let Some(err) = file_error {
        warn!(dir = %dir.display(), error = %err, "log file unavailable; logging to console only");
    }
}

fn open_log_file(dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(dir)?;
    OpenOptions::new().create(true).append(true).open(dir.join(LOG_FILE))
}

async fn cancel_on_signal(token: CancellationToken) {
    shutdown_signal().await;
    info!("shutdown signal received");
    token.cancel();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn log_file_is_created_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join(LOG_DIR);

        writeln!(open_log_file(&logs).unwrap(), "first").unwrap();
        writeln!(open_log_file(&logs).unwrap(), "second").unwrap();

        let contents = std::fs::read_to_string(logs.join(LOG_FILE)).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn blocked_log_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join(LOG_DIR);
        std::fs::write(&blocker, b"not a directory").unwrap();
        assert!(open_log_file(&blocker).is_err());
    }
}
