//! Unified error type for the conversion pipeline.
//!
//! Staging, extraction and process errors are consolidated into a single
//! `ConversionError` enum that maps cleanly to `modelconv_core::AppError`.

use modelconv_core::error::{AppError, ErrorKind};
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    // --- Staging errors ---
    /// The upload is not a `.zip` archive.
    #[error("Upload '{filename}' is not a .zip archive")]
    UnsupportedArchive {
        /// Original filename of the upload.
        filename: String,
    },

    /// The archive holds no file with a recognized model extension.
    #[error("Archive contains no supported model file")]
    NoModelFileFound,

    /// The archive exceeds the configured entry count or extracted size.
    #[error("Archive exceeds limit: {reason}")]
    ArchiveTooLarge {
        /// Which limit was exceeded.
        reason: String,
    },

    /// The archive could not be read.
    #[error("Invalid archive: {0}")]
    InvalidArchive(#[from] zip::result::ZipError),

    // --- Converter errors ---
    /// The model file's extension is not in the format registry.
    #[error("Unsupported model type: {path}")]
    UnsupportedType {
        /// The rejected path.
        path: PathBuf,
    },

    /// The converter could not be spawned or exited with a non-zero status.
    #[error("Converter exited with code {code}: {stderr}")]
    ConversionFailed {
        /// Exit code, `-1` for spawn failures and signal termination.
        code: i32,
        /// Captured (truncated) stderr output.
        stderr: String,
    },

    /// The converter did not finish before the deadline and was killed.
    #[error("Converter timed out after {timeout_seconds}s")]
    ConversionTimedOut {
        /// The deadline that was exceeded.
        timeout_seconds: u64,
    },

    /// The converter exited successfully but produced no artifact.
    #[error("Converted artifact not found: {path}")]
    OutputMissing {
        /// Expected artifact path.
        path: PathBuf,
    },

    /// The converted artifact is smaller than the configured minimum.
    #[error("Converted artifact is empty: {path}")]
    OutputEmpty {
        /// Path to the undersized artifact.
        path: PathBuf,
    },

    // --- Generic errors ---
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tokio task join error.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        let kind = match &err {
            ConversionError::UnsupportedArchive { .. }
            | ConversionError::NoModelFileFound
            | ConversionError::ArchiveTooLarge { .. }
            | ConversionError::InvalidArchive(_)
            | ConversionError::UnsupportedType { .. } => ErrorKind::Validation,
            ConversionError::ConversionFailed { .. }
            | ConversionError::ConversionTimedOut { .. }
            | ConversionError::OutputMissing { .. }
            | ConversionError::OutputEmpty { .. } => ErrorKind::ExternalService,
            ConversionError::Io(_) => ErrorKind::Storage,
            ConversionError::Join(_) => ErrorKind::Internal,
        };
        let message = err.to_string();
        AppError::with_source(kind, message, err)
    }
}
