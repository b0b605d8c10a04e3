//! Request orchestration: staging → conversion → streaming.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use modelconv_core::config::converter::ConversionConfig;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::ConversionError;
use crate::filesystem::{ArchiveLimits, FsUtils};
use crate::invoker::ConverterInvoker;
use crate::metrics::{ConversionMetrics, MetricsSnapshot};
use crate::stager::{ArchiveStager, UploadedFile};
use crate::stream::ArtifactStream;
use crate::workspace::WorkingDirectory;

/// Coordinates the pipeline for individual requests.
///
/// Cheap to clone; clones share the converter slot limiter and metrics.
#[derive(Debug, Clone)]
pub struct RequestOrchestrator {
    stager: ArchiveStager,
    invoker: ConverterInvoker,
    sample_input: PathBuf,
    api_key: Option<String>,
    metrics: Arc<ConversionMetrics>,
}

impl RequestOrchestrator {
    /// Create an orchestrator and make sure the temp root exists.
    ///
    /// `api_key` is the shared access secret; `None` disables the check.
    pub fn new(config: &ConversionConfig, api_key: Option<String>) -> Result<Self, ConversionError> {
        let temp_root = config.effective_temp_root();
        std::fs::create_dir_all(&temp_root)?;

        let limits = ArchiveLimits {
            max_entries: config.max_archive_entries,
            max_extracted_bytes: config.max_extracted_bytes,
        };

        Ok(Self {
            stager: ArchiveStager::new(temp_root, limits),
            invoker: ConverterInvoker::new(config),
            sample_input: config.sample_input.clone(),
            api_key: api_key.filter(|k| !k.is_empty()),
            metrics: Arc::new(ConversionMetrics::new()),
        })
    }

    /// Root directory for uploads and working directories.
    pub fn temp_root(&self) -> &Path {
        self.stager.temp_root()
    }

    /// A fresh path under the temp root for spooling an upload body.
    pub fn upload_spool_path(&self) -> PathBuf {
        self.temp_root()
            .join(format!("upload_{}", Uuid::now_v7().simple()))
    }

    /// Convert an uploaded archive and stream back the artifact.
    ///
    /// Errors are returned as-is; nothing is retried. The upload's spool file
    /// is removed by its guard if staging fails before it was moved.
    #[instrument(skip(self, uploaded), fields(filename = %uploaded.original_name))]
    pub async fn handle_upload(
        &self,
        uploaded: UploadedFile,
    ) -> Result<ArtifactStream, ConversionError> {
        self.metrics.record_upload();

        let staged = match self.stager.stage(&uploaded).await {
            Ok(staged) => staged,
            Err(e) => {
                self.metrics.record_rejected();
                warn!(error = %e, "Staging failed");
                return Err(e);
            }
        };

        self.convert_in(&staged.model_path, staged.workspace).await
    }

    /// Convert the bundled sample, bypassing staging.
    ///
    /// The sample is copied into a fresh working directory first so the
    /// bundled file is never modified and the output stays isolated.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<ArtifactStream, ConversionError> {
        let result: Result<ArtifactStream, ConversionError> = async {
            let workspace = WorkingDirectory::create(self.temp_root()).await?;
            let sample = workspace.join(FsUtils::extract_filename_str(&self.sample_input));
            tokio::fs::copy(&self.sample_input, &sample).await?;
            self.convert_in(&sample, workspace).await
        }
        .await;

        if let Err(ref e) = result {
            self.metrics.record_health_failure();
            warn!(error = %e, sample = %self.sample_input.display(), "Converter health check failed");
        }
        result
    }

    /// Run the converter with output into `workspace` and open the artifact.
    async fn convert_in(
        &self,
        model_path: &Path,
        workspace: WorkingDirectory,
    ) -> Result<ArtifactStream, ConversionError> {
        self.metrics.record_started();
        let start = Instant::now();

        let artifact = match self.invoker.convert(model_path, workspace.path()).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.metrics
                    .record_failure(matches!(e, ConversionError::ConversionTimedOut { .. }));
                return Err(e);
            }
        };

        let job_id = workspace.id();
        let stream = ArtifactStream::open(&artifact, workspace).await?;
        self.metrics.record_success(start.elapsed(), stream.size());

        info!(
            %job_id,
            artifact = %stream.file_name(),
            size_bytes = stream.size(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Conversion ready for streaming"
        );
        Ok(stream)
    }

    /// Whether requests must present the shared access key.
    pub fn requires_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check a presented access key against the configured one.
    ///
    /// Always `true` when no key is configured.
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        match (&self.api_key, presented) {
            (None, _) => true,
            (Some(expected), Some(given)) => constant_time_compare(expected, given),
            (Some(_), None) => false,
        }
    }

    /// The converter invoker.
    pub fn invoker(&self) -> &ConverterInvoker {
        &self.invoker
    }

    /// Get a metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Compare two secrets without short-circuiting on the first mismatch or on
/// differing lengths.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());

    let mut result = (a.len() != b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::test_support::wait_empty;

    fn config_in(root: &Path) -> ConversionConfig {
        ConversionConfig {
            temp_root: Some(root.join("work")),
            program: "/nonexistent/converter".to_string(),
            args: vec!["{input}".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(constant_time_compare("", ""));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_authorize_without_key_accepts_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orch = RequestOrchestrator::new(&config_in(temp.path()), None).expect("create");
        assert!(!orch.requires_key());
        assert!(orch.authorize(None));
        assert!(orch.authorize(Some("anything")));
    }

    #[test]
    fn test_authorize_with_injected_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orch = RequestOrchestrator::new(&config_in(temp.path()), Some("s3cret".to_string()))
            .expect("create");
        assert!(orch.requires_key());
        assert!(orch.authorize(Some("s3cret")));
        assert!(!orch.authorize(Some("s3cre")));
        assert!(!orch.authorize(None));
    }

    #[test]
    fn test_empty_key_disables_check() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orch = RequestOrchestrator::new(&config_in(temp.path()), Some(String::new()))
            .expect("create");
        assert!(!orch.requires_key());
    }

    #[tokio::test]
    async fn test_non_zip_upload_is_rejected_and_discarded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orch = RequestOrchestrator::new(&config_in(temp.path()), None).expect("create");
        let temp_path = orch.upload_spool_path();
        tokio::fs::write(&temp_path, b"raw model").await.expect("write");

        let result = orch
            .handle_upload(UploadedFile {
                original_name: "model.obj".to_string(),
                temp_path: temp_path.clone(),
            })
            .await;

        assert!(matches!(result, Err(ConversionError::UnsupportedArchive { .. })));
        assert!(!temp_path.exists());
        let snap = orch.metrics_snapshot();
        assert_eq!(snap.uploads_received, 1);
        assert_eq!(snap.uploads_rejected, 1);
        assert_eq!(snap.conversions_started, 0);
    }

    #[tokio::test]
    async fn test_health_check_missing_sample_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ConversionConfig {
            sample_input: temp.path().join("missing.dae"),
            ..config_in(temp.path())
        };
        let orch = RequestOrchestrator::new(&config, None).expect("create");

        let result = orch.health_check().await;
        assert!(matches!(result, Err(ConversionError::Io(_))));
        assert_eq!(orch.metrics_snapshot().health_checks_failed, 1);

        let leftovers = wait_empty(orch.temp_root()).await;
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use futures::StreamExt;
        use std::fs::File;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        use zip::write::SimpleFileOptions;

        /// Converter stand-in: writes `<stem>.glb` next to its input.
        const FAKE_CONVERTER: &str = r#"#!/bin/sh
out="$(dirname "$1")/$(basename "$1" | sed 's/\.[^.]*$//').glb"
printf 'glTF' > "$out"
cat "$1" >> "$out"
"#;

        fn install(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, body).expect("write script");
            let mut perms = std::fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        fn orchestrator(root: &Path, script_body: &str) -> RequestOrchestrator {
            let tool = install(root, "convert.sh", script_body);
            let sample = root.join("hello.dae");
            std::fs::write(&sample, b"<COLLADA/>").expect("write sample");
            let config = ConversionConfig {
                program: tool.to_string_lossy().to_string(),
                sample_input: sample,
                ..config_in(root)
            };
            RequestOrchestrator::new(&config, None).expect("create")
        }

        fn spool_zip(orch: &RequestOrchestrator, entries: &[(&str, &[u8])]) -> PathBuf {
            let path = orch.upload_spool_path();
            let mut writer = zip::ZipWriter::new(File::create(&path).expect("create"));
            for (name, data) in entries {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .expect("start");
                writer.write_all(data).expect("write");
            }
            writer.finish().expect("finish");
            path
        }

        async fn collect(mut stream: ArtifactStream) -> Vec<u8> {
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk.expect("chunk"));
            }
            body
        }

        #[tokio::test]
        async fn test_upload_round_trip() {
            let temp = tempfile::tempdir().expect("tempdir");
            let orch = orchestrator(temp.path(), FAKE_CONVERTER);
            let temp_path = spool_zip(&orch, &[("notes.txt", b"n"), ("chair.obj", b"v 1 1 1")]);

            let stream = orch
                .handle_upload(UploadedFile {
                    original_name: "chair.zip".to_string(),
                    temp_path,
                })
                .await
                .expect("convert");

            assert_eq!(stream.file_name(), "chair.glb");
            let body = collect(stream).await;
            assert_eq!(body, b"glTFv 1 1 1");

            // Working directory is gone once the body has been read.
            let leftovers = wait_empty(orch.temp_root()).await;
            assert_eq!(leftovers, 0);

            let snap = orch.metrics_snapshot();
            assert_eq!(snap.conversions_succeeded, 1);
            assert_eq!(snap.total_output_bytes, body.len() as u64);
        }

        #[tokio::test]
        async fn test_converter_failure_cleans_up() {
            let temp = tempfile::tempdir().expect("tempdir");
            let orch = orchestrator(temp.path(), "#!/bin/sh\necho broken >&2\nexit 1\n");
            let temp_path = spool_zip(&orch, &[("mesh.stl", b"solid")]);

            let result = orch
                .handle_upload(UploadedFile {
                    original_name: "mesh.zip".to_string(),
                    temp_path,
                })
                .await;

            assert!(matches!(
                result,
                Err(ConversionError::ConversionFailed { code: 1, .. })
            ));
            let leftovers = wait_empty(orch.temp_root()).await;
            assert_eq!(leftovers, 0);
            assert_eq!(orch.metrics_snapshot().conversions_failed, 1);
        }

        #[tokio::test]
        async fn test_health_check_converts_sample() {
            let temp = tempfile::tempdir().expect("tempdir");
            let orch = orchestrator(temp.path(), FAKE_CONVERTER);

            let stream = orch.health_check().await.expect("health");
            assert_eq!(stream.file_name(), "hello.glb");
            let body = collect(stream).await;
            assert!(!body.is_empty());

            // The bundled sample is untouched and no artifact lands beside it.
            assert!(temp.path().join("hello.dae").is_file());
            assert!(!temp.path().join("hello.glb").exists());
        }

        #[tokio::test]
        async fn test_health_check_reports_converter_failure() {
            let temp = tempfile::tempdir().expect("tempdir");
            let orch = orchestrator(temp.path(), "#!/bin/sh\nexit 7\n");

            let result = orch.health_check().await;
            assert!(matches!(
                result,
                Err(ConversionError::ConversionFailed { code: 7, .. })
            ));
            assert_eq!(orch.metrics_snapshot().health_checks_failed, 1);
        }

        #[tokio::test]
        async fn test_concurrent_uploads_are_isolated() {
            let temp = tempfile::tempdir().expect("tempdir");
            let orch = orchestrator(temp.path(), FAKE_CONVERTER);
            let first = spool_zip(&orch, &[("model.obj", b"first")]);
            let second = spool_zip(&orch, &[("model.obj", b"second")]);

            let (a, b) = tokio::join!(
                orch.handle_upload(UploadedFile {
                    original_name: "a.zip".to_string(),
                    temp_path: first,
                }),
                orch.handle_upload(UploadedFile {
                    original_name: "b.zip".to_string(),
                    temp_path: second,
                }),
            );

            // Same base name in both archives: outputs must not collide.
            let a = collect(a.expect("a")).await;
            let b = collect(b.expect("b")).await;
            assert_eq!(a, b"glTFfirst");
            assert_eq!(b, b"glTFsecond");
        }
    }
}
