//! Archive staging: unpacks an uploaded zip into a working directory and
//! picks the model file to convert.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::error::ConversionError;
use crate::filesystem::{ArchiveLimits, FsUtils};
use crate::formats;
use crate::workspace::WorkingDirectory;

/// Name under which the original upload is kept inside the working directory.
pub const ARCHIVE_FILE_NAME: &str = "model.zip";

/// A received upload, spooled to disk by the HTTP layer.
///
/// Owns the spool file: it is deleted when this value is dropped unless
/// staging has already moved it into a working directory. Create it before
/// writing the body so partial spools are covered too.
#[derive(Debug)]
pub struct UploadedFile {
    /// Filename as sent by the client.
    pub original_name: String,
    /// Where the upload body was written.
    pub temp_path: PathBuf,
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = %self.temp_path.display(), "Removed upload spool file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.temp_path.display(),
                error = %e,
                "Failed to remove upload spool file"
            ),
        }
    }
}

/// Result of staging: the working directory and the model file inside it.
#[derive(Debug)]
pub struct StagedModel {
    /// Owns the extracted files; removed on drop.
    pub workspace: WorkingDirectory,
    /// The model file selected for conversion.
    pub model_path: PathBuf,
}

/// Extracts uploaded archives into per-request working directories.
#[derive(Debug, Clone)]
pub struct ArchiveStager {
    temp_root: PathBuf,
    limits: ArchiveLimits,
}

impl ArchiveStager {
    /// Create a stager rooted at `temp_root`.
    pub fn new(temp_root: PathBuf, limits: ArchiveLimits) -> Self {
        Self { temp_root, limits }
    }

    /// Root under which working directories are created.
    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Stage an upload.
    ///
    /// Fails with [`ConversionError::UnsupportedArchive`] unless the original
    /// filename ends in `.zip`; a bare model file is not accepted here. On
    /// success the upload has been moved into the working directory as
    /// [`ARCHIVE_FILE_NAME`]. On failure the working directory is removed.
    #[instrument(skip(self, uploaded), fields(filename = %uploaded.original_name))]
    pub async fn stage(&self, uploaded: &UploadedFile) -> Result<StagedModel, ConversionError> {
        if !formats::is_archive_name(&uploaded.original_name) {
            return Err(ConversionError::UnsupportedArchive {
                filename: uploaded.original_name.clone(),
            });
        }

        let workspace = WorkingDirectory::create(&self.temp_root).await?;

        let zip_path = uploaded.temp_path.clone();
        let extract_to = workspace.path().to_path_buf();
        let limits = self.limits;
        let written = tokio::task::spawn_blocking(move || {
            FsUtils::extract_zip_file(&zip_path, &extract_to, limits)
        })
        .await??;

        debug!(
            dir = %workspace.path().display(),
            files = written,
            "Archive extracted"
        );

        FsUtils::move_file(&uploaded.temp_path, &workspace.join(ARCHIVE_FILE_NAME)).await?;

        let model_path = FsUtils::find_model_file(workspace.path())
            .await?
            .ok_or(ConversionError::NoModelFileFound)?;

        info!(
            job_id = %workspace.id(),
            model = %FsUtils::extract_filename_str(&model_path),
            "Upload staged"
        );

        Ok(StagedModel {
            workspace,
            model_path,
        })
    }
}
