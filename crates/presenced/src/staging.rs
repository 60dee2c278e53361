//! Short-lived on-disk copies of submitted check-in images.

use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("submitted data is not a recognized image format")]
    UnrecognizedFormat,
    #[error("failed to stage image at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A submitted image written to the staging directory.
///
/// The file is removed when the value is dropped, on every exit path of the
/// check-in that owns it.
#[derive(Debug)]
pub struct StagedImage {
    path: PathBuf,
}

impl StagedImage {
    /// Sniff the image format and write `bytes` under a unique name in `dir`.
    pub async fn write(dir: &Path, bytes: &[u8]) -> Result<Self, StagingError> {
        let format = image::guess_format(bytes).map_err(|_| StagingError::UnrecognizedFormat)?;
        let ext = format.extensions_str().first().copied().unwrap_or("img");

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StagingError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        // Owned before the write so a partial file is cleaned up too.
        let staged = Self {
            path: dir.join(format!("checkin-{}.{ext}", Uuid::new_v4())),
        };
        tokio::fs::write(&staged.path, bytes)
            .await
            .map_err(|source| StagingError::Io {
                path: staged.path.clone(),
                source,
            })?;

        tracing::debug!(path = %staged.path.display(), bytes = bytes.len(), "staged submission");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Check that `path` is a readable file in a recognized image format.
///
/// Used for enrolled reference images, which are read in place at check-in.
pub async fn check_reference(path: &Path) -> Result<(), StagingError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| StagingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    image::guess_format(&bytes).map_err(|_| StagingError::UnrecognizedFormat)?;
    Ok(())
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed staged submission"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged submission")
            }
        }
    }
}
