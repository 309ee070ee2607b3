use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no startup time has been recorded")]
    NotFound,

    #[error("startup time file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("startup time file I/O failed")]
    Io(#[from] io::Error),
}

/// A single durable instant.
#[async_trait]
pub trait StartupTimeStore: Send + Sync {
    /// Fails with [`StoreError::NotFound`] until the first `store`.
    async fn load(&self) -> Result<DateTime<Utc>, StoreError>;

    async fn store(&self, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// File-backed store: one RFC 3339 line, cached after the first read.
pub struct FileStartupTimeStore {
    path: PathBuf,
    cache: Mutex<Option<DateTime<Utc>>>,
}

impl FileStartupTimeStore {
    /// Create the parent directories and an empty marker file if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "Startup time store ready");

        Ok(Self {
            path,
            cache: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<DateTime<Utc>, StoreError> {
        let text = fs::read_to_string(&self.path).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::NotFound);
        }
        DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StartupTimeStore for FileStartupTimeStore {
    async fn load(&self) -> Result<DateTime<Utc>, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(at) = *cache {
            return Ok(at);
        }
        let at = self.read_file().await?;
        *cache = Some(at);
        Ok(at)
    }

    async fn store(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;

        let tmp = self.temp_path();
        let line = format!("{}\n", at.to_rfc3339_opts(SecondsFormat::Nanos, true));
        fs::write(&tmp, line).await?;
        fs::rename(&tmp, &self.path).await?;

        *cache = Some(at);
        debug!(at = %at, "Startup time stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap() + chrono::Duration::nanoseconds(123_456_789)
    }

    #[tokio::test]
    async fn open_creates_missing_directories_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/time");

        let store = FileStartupTimeStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[tokio::test]
    async fn load_before_store_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStartupTimeStore::open(dir.path().join("time")).await.unwrap();
        assert!(matches!(store.load().await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn stored_value_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time");

        let store = FileStartupTimeStore::open(&path).await.unwrap();
        store.store(instant()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), instant());

        let reopened = FileStartupTimeStore::open(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), instant());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "2024-05-01T12:30:00.123456789Z\n"
        );
    }

    #[tokio::test]
    async fn store_overwrites_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStartupTimeStore::open(dir.path().join("time")).await.unwrap();

        store.store(instant()).await.unwrap();
        let later = instant() + chrono::Duration::hours(1);
        store.store(later).await.unwrap();

        assert_eq!(store.load().await.unwrap(), later);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time");
        std::fs::write(&path, "yesterday-ish\n").unwrap();

        let store = FileStartupTimeStore::open(&path).await.unwrap();
        assert!(matches!(store.load().await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn open_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time");
        std::fs::write(&path, "2024-05-01T12:30:00Z").unwrap();

        let store = FileStartupTimeStore::open(&path).await.unwrap();
        assert_eq!(
            store.load().await.unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
    }
}
