//! Per-request scratch directories.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// A uniquely named directory under the temp root, owned by one request.
///
/// The directory and everything in it is removed when the guard is dropped,
/// whichever way the request ends.
#[derive(Debug)]
pub struct WorkingDirectory {
    id: Uuid,
    path: PathBuf,
}

impl WorkingDirectory {
    /// Create a fresh directory `<root>/<uuid>`.
    ///
    /// `create_dir` (not `create_dir_all`) is used for the leaf so that an
    /// identifier collision surfaces as an error instead of two requests
    /// sharing one directory.
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;

        let id = Uuid::now_v7();
        let path = root.join(id.simple().to_string());
        tokio::fs::create_dir(&path).await?;

        debug!(dir = %path.display(), "Created working directory");
        Ok(Self { id, path })
    }

    /// Unique identifier of this directory.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Absolute path of the directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `name` inside the directory.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for WorkingDirectory {
    /// Removal runs on the blocking pool when a runtime is available, so a
    /// large extraction never stalls an async worker.
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_tree(&path));
            }
            Err(_) => remove_tree(&path),
        }
    }
}

fn remove_tree(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(dir = %path.display(), "Removed working directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            dir = %path.display(),
            error = %e,
            "Failed to clean up working directory"
        ),
    }
}
