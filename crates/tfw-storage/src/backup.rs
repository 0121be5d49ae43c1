use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime};
use filetime::FileTime;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};

pub const BACKUP_PREFIX: &str = "traffic_backup_";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> BackupError {
    let path = path.to_path_buf();
    move |source| BackupError::Io { action, path, source }
}

/// Snapshots the database file into a backup directory and keeps at most
/// `retention` artifacts there, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct BackupRotator {
    db_path: PathBuf,
    backup_dir: PathBuf,
    retention: usize,
}

impl BackupRotator {
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            retention,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    fn extension(&self) -> String {
        self.db_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "db".to_string())
    }

    /// `traffic_backup_YYYY-MM-DD_HH-MM.<ext>`
    pub fn artifact_name(&self, created_at: NaiveDateTime) -> String {
        format!(
            "{BACKUP_PREFIX}{}.{}",
            created_at.format("%Y-%m-%d_%H-%M"),
            self.extension()
        )
    }

    /// Snapshot now. Never fails the caller; problems are logged.
    pub async fn rotate(&self) -> Option<PathBuf> {
        self.rotate_at(Local::now().naive_local()).await
    }

    pub async fn rotate_at(&self, created_at: NaiveDateTime) -> Option<PathBuf> {
        match self.try_rotate_at(created_at).await {
            Ok(created) => created,
            Err(err) => {
                error!(error = %err, "backup failed");
                None
            }
        }
    }

    async fn try_rotate_at(&self, created_at: NaiveDateTime) -> Result<Option<PathBuf>, BackupError> {
        let exists = fs::try_exists(&self.db_path)
            .await
            .map_err(io_err("checking database file", &self.db_path))?;
        if !exists {
            warn!(db = %self.db_path.display(), "backup skipped: database file does not exist");
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(io_err("creating backup directory", &self.backup_dir))?;

        let destination = self.backup_dir.join(self.artifact_name(created_at));
        fs::copy(&self.db_path, &destination)
            .await
            .map_err(io_err("copying database to", &destination))?;
        self.copy_file_times(&destination).await?;
        info!(artifact = %destination.display(), "backup created");

        self.enforce_retention().await?;
        Ok(Some(destination))
    }

    async fn copy_file_times(&self, destination: &Path) -> Result<(), BackupError> {
        let meta = fs::metadata(&self.db_path)
            .await
            .map_err(io_err("reading metadata of", &self.db_path))?;
        let accessed = FileTime::from_last_access_time(&meta);
        let modified = FileTime::from_last_modification_time(&meta);
        filetime::set_file_times(destination, accessed, modified)
            .map_err(io_err("setting file times on", destination))
    }

    /// Artifacts oldest first: modification time, then file name.
    pub async fn list_artifacts(&self) -> Result<Vec<PathBuf>, BackupError> {
        let mut entries = match fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err("listing", &self.backup_dir)(err)),
        };

        let suffix = format!(".{}", self.extension());
        let mut artifacts: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_err("listing", &self.backup_dir))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(BACKUP_PREFIX) || !name.ends_with(&suffix) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(io_err("reading metadata of", &entry.path()))?;
            artifacts.push((modified, entry.path()));
        }

        artifacts.sort();
        Ok(artifacts.into_iter().map(|(_, path)| path).collect())
    }

    /// Delete the oldest surplus artifacts. Returns how many were removed.
    async fn enforce_retention(&self) -> Result<usize, BackupError> {
        let artifacts = self.list_artifacts().await?;
        let surplus = artifacts.len().saturating_sub(self.retention);
        let mut removed = 0;
        for oldest in artifacts.iter().take(surplus) {
            match fs::remove_file(oldest).await {
                Ok(()) => {
                    removed += 1;
                    info!(artifact = %oldest.display(), "rotation removed old backup");
                }
                Err(err) => {
                    error!(artifact = %oldest.display(), error = %err, "could not remove old backup");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn artifact_name_encodes_minute_and_extension() {
        let rotator = BackupRotator::new("db/traffic.db", "backups", 5);
        assert_eq!(rotator.artifact_name(at(9, 5)), "traffic_backup_2024-05-02_09-05.db");
        let bare = BackupRotator::new("db/traffic", "backups", 5);
        assert_eq!(bare.artifact_name(at(9, 5)), "traffic_backup_2024-05-02_09-05.db");
    }

    #[tokio::test]
    async fn missing_database_is_a_no_op() {
        let dir = tempdir().unwrap();
        let rotator = BackupRotator::new(dir.path().join("traffic.db"), dir.path().join("backups"), 5);
        assert!(rotator.rotate().await.is_none());
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn copy_keeps_contents_and_modification_time() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("traffic.db");
        std::fs::write(&db, b"sqlite bytes").unwrap();
        let stamp = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&db, stamp).unwrap();

        let rotator = BackupRotator::new(&db, dir.path().join("backups"), 5);
        let created = rotator.rotate_at(at(10, 0)).await.expect("artifact");
        assert_eq!(std::fs::read(&created).unwrap(), b"sqlite bytes");
        let meta = std::fs::metadata(&created).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    }

    #[tokio::test]
    async fn retention_keeps_only_the_newest_artifacts() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("traffic.db");
        std::fs::write(&db, b"v0").unwrap();
        let rotator = BackupRotator::new(&db, dir.path().join("backups"), 5);

        for i in 0..7u32 {
            std::fs::write(&db, format!("v{i}")).unwrap();
            filetime::set_file_mtime(&db, FileTime::from_unix_time(1_700_000_000 + i as i64 * 60, 0)).unwrap();
            rotator.rotate_at(at(12, i)).await.expect("artifact");
            assert!(rotator.list_artifacts().await.unwrap().len() <= 5);
        }

        let remaining = rotator.list_artifacts().await.unwrap();
        assert_eq!(
            names(&remaining),
            (2..7)
                .map(|i| format!("traffic_backup_2024-05-02_12-0{i}.db"))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn equal_modification_times_fall_back_to_name_order() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("traffic.db");
        std::fs::write(&db, b"unchanged").unwrap();
        let rotator = BackupRotator::new(&db, dir.path().join("backups"), 2);

        for minute in [10, 20, 30] {
            rotator.rotate_at(at(7, minute)).await.expect("artifact");
        }

        assert_eq!(
            names(&rotator.list_artifacts().await.unwrap()),
            vec!["traffic_backup_2024-05-02_07-20.db", "traffic_backup_2024-05-02_07-30.db"]
        );
    }

    #[tokio::test]
    async fn foreign_files_are_left_alone() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("traffic.db");
        std::fs::write(&db, b"x").unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("notes.txt"), b"keep").unwrap();

        let rotator = BackupRotator::new(&db, &backups, 1);
        rotator.rotate_at(at(1, 0)).await.unwrap();
        rotator.rotate_at(at(2, 0)).await.unwrap();

        assert!(backups.join("notes.txt").exists());
        assert_eq!(rotator.list_artifacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undeletable_artifact_does_not_abort_rotation() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("traffic.db");
        std::fs::write(&db, b"current").unwrap();
        filetime::set_file_mtime(&db, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        let backups = dir.path().join("backups");
        let stuck = backups.join("traffic_backup_2024-05-01_00-00.db");
        std::fs::create_dir_all(&stuck).unwrap();
        filetime::set_file_mtime(&stuck, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let rotator = BackupRotator::new(&db, &backups, 1);
        let created = rotator.rotate_at(at(9, 0)).await.expect("artifact");

        assert!(created.exists());
        assert!(stuck.is_dir());
        assert_eq!(
            names(&rotator.list_artifacts().await.unwrap()),
            vec!["traffic_backup_2024-05-01_00-00.db", "traffic_backup_2024-05-02_09-00.db"]
        );
    }
}
