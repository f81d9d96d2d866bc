//! # Recording Persistence
//!
//! [`RecordingStore`] is the seam between the job pipeline and durable storage.
//! Backends:
//! - **JsonRecordingStore**: one JSON document per recording on disk, used in production
//! - **MemoryRecordingStore**: a `HashMap` behind an async `RwLock`, test builds only
//!
//! Writes are upserts keyed by `RecordingId`.

use crate::recording::model::{Recording, RecordingId, RecordingStatus};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
#[cfg(test)]
use {std::collections::HashMap, tokio::sync::RwLock};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode recording: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt recording file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Insert or replace the recording with the same id.
    async fn save(&self, recording: &Recording) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &RecordingId) -> Result<Option<Recording>, StoreError>;

    /// All recordings belonging to `owner`, newest first.
    async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Recording>, StoreError>;

    /// All recordings in `status`, oldest first.
    async fn find_by_status(&self, status: RecordingStatus) -> Result<Vec<Recording>, StoreError>;
}

fn newest_first(recordings: &mut [Recording]) {
    recordings.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

fn oldest_first(recordings: &mut [Recording]) {
    recordings.sort_by_key(|r| r.created_at());
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryRecordingStore {
    records: RwLock<HashMap<RecordingId, Recording>>,
}

#[cfg(test)]
impl MemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl RecordingStore for MemoryRecordingStore {
    async fn save(&self, recording: &Recording) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(recording.id(), recording.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &RecordingId) -> Result<Option<Recording>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Recording>, StoreError> {
        let mut found: Vec<Recording> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner() == owner)
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn find_by_status(&self, status: RecordingStatus) -> Result<Vec<Recording>, StoreError> {
        let mut found: Vec<Recording> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status() == status)
            .cloned()
            .collect();
        oldest_first(&mut found);
        Ok(found)
    }
}

/// File-backed store: `<dir>/<id>.json`, replaced atomically via rename.
#[derive(Debug)]
pub struct JsonRecordingStore {
    dir: PathBuf,
}

impl JsonRecordingStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "Opened recording store");
        Ok(Self { dir })
    }

    fn path_for(&self, id: &RecordingId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_file(path: &Path) -> Result<Option<Recording>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn load_all(&self) -> Result<Vec<Recording>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut recordings = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            // A file can vanish between listing and reading; skip it.
            match Self::read_file(&path).await {
                Ok(Some(recording)) => recordings.push(recording),
                Ok(None) => {}
                Err(e @ StoreError::Corrupt { .. }) => {
                    tracing::error!(error = %e, "Skipping unreadable recording file");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(recordings)
    }
}

#[async_trait]
impl RecordingStore for JsonRecordingStore {
    async fn save(&self, recording: &Recording) -> Result<(), StoreError> {
        let path = self.path_for(&recording.id());
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(recording)?;

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &RecordingId) -> Result<Option<Recording>, StoreError> {
        Self::read_file(&self.path_for(id)).await
    }

    async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Recording>, StoreError> {
        let mut found: Vec<Recording> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.owner() == owner)
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn find_by_status(&self, status: RecordingStatus) -> Result<Vec<Recording>, StoreError> {
        let mut found: Vec<Recording> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.status() == status)
            .collect();
        oldest_first(&mut found);
        Ok(found)
    }
}
