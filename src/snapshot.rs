//! Throwaway page snapshots for the vision model.
//!
//! Each capture is written to a timestamped file in the output directory,
//! read back as base64, and removed when its guard drops, on success and on
//! every error path alike.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use thiserror::Error;

use crate::browser::{BrowserSession, SessionError};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to capture screenshot: {0}")]
    Capture(#[from] SessionError),
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct SnapshotStore {
    output_dir: PathBuf,
    sequence: AtomicU64,
}

impl SnapshotStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), SnapshotError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| SnapshotError::CreateDir {
                path: self.output_dir.clone(),
                source,
            })
    }

    /// Capture the page and return the image as standard base64.
    pub async fn capture_base64<S>(&self, session: &S) -> Result<String, SnapshotError>
    where
        S: BrowserSession + ?Sized,
    {
        self.ensure_dir().await?;
        let file = SnapshotFile::new(self.next_path());

        session.save_screenshot(file.path()).await?;
        let bytes = tokio::fs::read(file.path())
            .await
            .map_err(|source| SnapshotError::Read {
                path: file.path().to_path_buf(),
                source,
            })?;

        Ok(STANDARD.encode(bytes))
    }

    fn next_path(&self) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.output_dir
            .join(format!("temp_screenshot_{timestamp}_{sequence}.png"))
    }
}

/// Deletes the snapshot file on drop.
struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to remove snapshot {}: {err}", self.path.display());
            }
        }
    }
}
