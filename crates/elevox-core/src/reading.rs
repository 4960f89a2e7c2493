//! The published floor reading.
//!
//! The scheduler is the only writer. Readers hold a [`ReadingHandle`] and see
//! each `(floor, observed_at)` pair replaced as a whole, so a floor can never
//! be paired with another reading's timestamp. The latest reading is also
//! mirrored to a small JSON file so it survives restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use utoipa::ToSchema;

/// Last successful floor estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FloorReading {
    /// Estimated floor.
    #[schema(example = 1)]
    pub floor: u32,

    /// When the scan window that produced it closed.
    pub observed_at: DateTime<Utc>,
}

impl FloorReading {
    /// Reading for `floor` observed now.
    #[must_use]
    pub fn now(floor: u32) -> Self {
        Self {
            floor,
            observed_at: Utc::now(),
        }
    }
}

/// Create a reading cell seeded with `initial`.
#[must_use]
pub fn reading_cell(initial: Option<FloorReading>) -> (ReadingPublisher, ReadingHandle) {
    let (tx, rx) = watch::channel(initial);
    (ReadingPublisher { tx }, ReadingHandle { rx })
}

/// Write side of the reading cell.
#[derive(Debug)]
pub struct ReadingPublisher {
    tx: watch::Sender<Option<FloorReading>>,
}

impl ReadingPublisher {
    /// Replace the current reading.
    pub fn publish(&self, reading: FloorReading) {
        self.tx.send_replace(Some(reading));
    }

    /// New read handle.
    #[must_use]
    pub fn subscribe(&self) -> ReadingHandle {
        ReadingHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the reading cell. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReadingHandle {
    rx: watch::Receiver<Option<FloorReading>>,
}

impl ReadingHandle {
    /// Current reading, if one has been published.
    #[must_use]
    pub fn current(&self) -> Option<FloorReading> {
        *self.rx.borrow()
    }

    /// Wait for the next published reading.
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<FloorReading> {
        self.rx.changed().await.ok()?;
        *self.rx.borrow_and_update()
    }
}

/// Errors reading or writing the persisted reading.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read the file.
    #[error("Failed to read reading file '{}': {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the file.
    #[error("Failed to write reading file '{}': {source}", path.display())]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the parent directory.
    #[error("Failed to create directory '{}': {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not hold a valid reading.
    #[error("Failed to parse reading file '{}': {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The reading could not be serialized.
    #[error("Failed to serialize reading: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// JSON file holding the last reading.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    path: PathBuf,
}

impl ReadingStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored reading, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<FloorReading>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let reading = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(reading))
    }

    /// Persist `reading`, replacing the previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, reading: &FloorReading) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(reading).map_err(StoreError::Serialize)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Default location of the persisted reading.
///
/// On Linux: `/var/lib/elevox/reading.json`.
/// Elsewhere: the platform data directory.
#[must_use]
pub fn default_reading_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/elevox/reading.json")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "elevox").map_or_else(
            || PathBuf::from("./reading.json"),
            |dirs| dirs.data_dir().join("reading.json"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> FloorReading {
        FloorReading {
            floor: 2,
            observed_at: Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ReadingStore::new(dir.path().join("state").join("reading.json"));

        assert!(store.load().unwrap().is_none());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reading.json");
        std::fs::write(&path, "not json").unwrap();

        let err = ReadingStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_stored_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["floor"], 2);
        assert_eq!(json["observed_at"], "2025-03-14T09:26:53Z");
    }

    #[tokio::test]
    async fn test_cell_replaces_whole_reading() {
        let (publisher, handle) = reading_cell(None);
        let mut watcher = publisher.subscribe();
        assert_eq!(handle.current(), None);

        publisher.publish(sample());
        assert_eq!(watcher.changed().await, Some(sample()));
        assert_eq!(handle.current(), Some(sample()));

        let next = FloorReading::now(3);
        publisher.publish(next);
        assert_eq!(handle.current(), Some(next));
    }
}
