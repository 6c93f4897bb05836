//! Per-record scratch directories.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vsum_models::RecordId;

/// Scratch directory `<root>/<record_id>/` owned by one run.
///
/// Removed by [`WorkDir::release`] on the normal path, and by `Drop` if the
/// run unwinds or returns early. Only this directory is ever deleted.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    released: bool,
}

impl WorkDir {
    /// Create a fresh directory for `record_id`, removing leftovers from an
    /// earlier run first.
    pub async fn allocate(root: &Path, record_id: &RecordId) -> io::Result<Self> {
        let path = root.join(record_id.as_str());

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!("Removed leftover working directory {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&path).await?;

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it.
    pub async fn release(mut self) -> io::Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove working directory {}: {}", self.path.display(), e);
            }
        }
    }
}
