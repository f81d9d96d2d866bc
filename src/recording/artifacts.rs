//! Audio artifact storage: uploaded audio is kept as `<root>/<recording id>`.

use crate::recording::model::RecordingId;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create the directory if needed and resolve it to an absolute path, so
    /// paths handed to the transcription engine do not depend on its cwd.
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        tokio::fs::create_dir_all(root.as_ref()).await?;
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        tracing::info!(root = %root.display(), "Opened audio artifact store");
        Ok(Self { root })
    }

    pub fn path_for(&self, id: &RecordingId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub async fn write(&self, id: &RecordingId, audio: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(id);
        tokio::fs::write(&path, audio).await?;
        tracing::debug!(recording_id = %id, bytes = audio.len(), "Stored audio artifact");
        Ok(path)
    }

    pub async fn read(&self, id: &RecordingId) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path_for(id)).await
    }

    /// Delete the audio for `id`. Already missing is not an error.
    pub async fn remove(&self, id: &RecordingId) -> io::Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
