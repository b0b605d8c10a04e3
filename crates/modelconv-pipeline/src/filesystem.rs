//! Filesystem utilities for the conversion pipeline.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::ConversionError;
use crate::formats;

/// Bounds applied while extracting an uploaded archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    /// Maximum number of entries in the archive.
    pub max_entries: usize,
    /// Maximum total bytes written during extraction.
    pub max_extracted_bytes: u64,
}

/// Filesystem utility functions.
pub struct FsUtils;

impl FsUtils {
    /// Extract filename as String; returns `"unknown_file"` for empty paths.
    pub fn extract_filename_str(path: &Path) -> String {
        path.file_name()
            .and_then(|f| f.to_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown_file".to_string())
    }

    /// Extract a ZIP archive into `extract_to`, returning the number of files written.
    ///
    /// Entries whose names would escape `extract_to` are skipped. This is
    /// blocking IO; call it from `spawn_blocking`.
    pub fn extract_zip_file(
        zip_path: &Path,
        extract_to: &Path,
        limits: ArchiveLimits,
    ) -> Result<usize, ConversionError> {
        let file = File::open(zip_path)?;
        let mut archive = ZipArchive::new(file)?;

        if archive.len() > limits.max_entries {
            return Err(ConversionError::ArchiveTooLarge {
                reason: format!(
                    "{} entries, limit is {}",
                    archive.len(),
                    limits.max_entries
                ),
            });
        }

        let mut total_size = 0u64;
        let mut written = 0usize;

        for i in 0..archive.len() {
            let mut zip_file = archive.by_index(i)?;

            let enclosed_name = match zip_file.enclosed_name() {
                Some(path) => path.to_path_buf(),
                None => {
                    tracing::warn!(entry = %zip_file.name(), "Skipping unsafe archive entry");
                    continue;
                }
            };

            let out_path = extract_to.join(&enclosed_name);

            if zip_file.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }

            if let Some(p) = out_path.parent() {
                fs::create_dir_all(p)?;
            }

            // Count bytes actually inflated; declared sizes can lie.
            let remaining = limits.max_extracted_bytes - total_size;
            let mut outfile = File::create(&out_path)?;
            let copied = io::copy(
                &mut (&mut zip_file).take(remaining.saturating_add(1)),
                &mut outfile,
            )?;
            total_size += copied;

            if copied > remaining {
                return Err(ConversionError::ArchiveTooLarge {
                    reason: format!(
                        "extracted size exceeds {} bytes",
                        limits.max_extracted_bytes
                    ),
                });
            }

            written += 1;
        }

        Ok(written)
    }

    /// Move a file, falling back to copy + delete when rename fails
    /// (e.g. across devices).
    pub async fn move_file(from: &Path, to: &Path) -> Result<(), ConversionError> {
        if let Err(rename_err) = tokio::fs::rename(from, to).await {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "Rename failed, falling back to copy"
            );
            tokio::fs::copy(from, to).await.map_err(|_| rename_err)?;
            tokio::fs::remove_file(from).await?;
        }
        Ok(())
    }

    /// Find the model file among the direct entries of `dir`.
    ///
    /// Only regular files are considered, in file-name order, so the choice
    /// does not depend on the filesystem's enumeration order. Returns the
    /// first one whose extension is in the format registry.
    pub async fn find_model_file(dir: &Path) -> Result<Option<PathBuf>, ConversionError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(files.into_iter().find(|p| formats::is_supported_path(p)))
    }
}
