//! Durable key-value storage for records that outlive a single session.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use dashmap::DashMap;

use crate::error::MetricsError;

/// Storage key of the cached metric records.
pub const CACHED_METRICS_DATA_KEY: &str = "pendingEventsCache";

/// Storage key of the named timers.
pub const METRICS_TIMERS_KEY: &str = "timersCache";

/// String-valued key-value store.
pub trait MetricStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, MetricsError>;

    fn set(&self, key: &str, value: &str) -> Result<(), MetricsError>;

    fn remove(&self, key: &str) -> Result<(), MetricsError>;
}

/// Which store a timer lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageScope {
    /// Lives as long as the application session.
    #[default]
    Session,
    /// Survives restarts of the application.
    Persistent,
}

/// In-memory store, scoped to the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, MetricsError> {
        Ok(self.items.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MetricsError> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MetricsError> {
        self.items.remove(key);
        Ok(())
    }
}

/// Store keeping one JSON file per key under a directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens the store, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, MetricsError> {
        if key.is_empty() || key.contains(['/', '\\', '.']) {
            return Err(MetricsError::Storage(format!("invalid storage key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl MetricStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, MetricsError> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MetricsError> {
        let path = self.path(key)?;
        // Readers never observe a partially written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MetricsError> {
        match fs::remove_file(self.path(key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
