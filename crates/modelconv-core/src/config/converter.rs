//! Configuration for the external model converter and its scratch storage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Configuration for the conversion pipeline.
///
/// `program` and `args` describe how the external converter is launched.
/// Arguments may contain the placeholders `{input}`, `{input_dir}` and
/// `{output_dir}`, which are substituted per invocation.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Converter executable (looked up on `PATH` when not a path).
    #[validate(length(min = 1))]
    pub program: String,

    /// Argument template passed to the converter.
    pub args: Vec<String>,

    /// Working directory for the converter process. Defaults to the server's
    /// current directory.
    pub working_dir: Option<PathBuf>,

    /// Root directory for uploads and per-request working directories.
    pub temp_root: Option<PathBuf>,

    /// Deadline for a single converter invocation.
    #[validate(range(min = 1, max = 7200))]
    pub timeout_seconds: u64,

    /// Global limit for concurrently running converter processes.
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_conversions: usize,

    /// Minimum output size (bytes) to consider a conversion successful.
    pub min_output_bytes: u64,

    /// Maximum number of entries accepted in an uploaded archive.
    #[validate(range(min = 1))]
    pub max_archive_entries: usize,

    /// Maximum total uncompressed size of an uploaded archive.
    #[validate(range(min = 1u64, max = 1_099_511_627_776u64))]
    pub max_extracted_bytes: u64,

    /// Bundled known-good model used by the health check.
    pub sample_input: PathBuf,

    /// Whether to capture converter stdout/stderr for diagnostics.
    pub capture_output: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            temp_root: None,
            timeout_seconds: default_timeout_seconds(),
            max_concurrent_conversions: default_max_concurrent_conversions(),
            min_output_bytes: default_min_output_bytes(),
            max_archive_entries: default_max_archive_entries(),
            max_extracted_bytes: default_max_extracted_bytes(),
            sample_input: default_sample_input(),
            capture_output: true,
        }
    }
}

fn default_program() -> String {
    "sh".to_string()
}

fn default_args() -> Vec<String> {
    vec!["exec/convert.sh".to_string(), "{input}".to_string()]
}

fn default_timeout_seconds() -> u64 {
    600
}

fn default_max_concurrent_conversions() -> usize {
    4
}

fn default_min_output_bytes() -> u64 {
    1
}

fn default_max_archive_entries() -> usize {
    10_000
}

fn default_max_extracted_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_sample_input() -> PathBuf {
    PathBuf::from("assets/hello.dae")
}

impl ConversionConfig {
    /// Resolve the effective temp root directory.
    pub fn effective_temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("modelconv"))
    }
}
