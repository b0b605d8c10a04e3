//! External converter invocation.
//!
//! Runs the configured converter as a child process with a deadline and
//! resolves the `.glb` artifact it leaves behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use modelconv_core::config::converter::ConversionConfig;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ConversionError;
use crate::filesystem::FsUtils;
use crate::formats;

/// Maximum number of stderr characters kept in a `ConversionFailed` error.
const MAX_STDERR_CHARS: usize = 2000;

/// Launches the external converter.
#[derive(Debug, Clone)]
pub struct ConverterInvoker {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout_seconds: u64,
    min_output_bytes: u64,
    capture_output: bool,
    /// Global limit on concurrently running converter processes.
    limiter: Arc<Semaphore>,
}

impl ConverterInvoker {
    /// Create an invoker from the converter configuration.
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout_seconds: config.timeout_seconds,
            min_output_bytes: config.min_output_bytes,
            capture_output: config.capture_output,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_conversions)),
        }
    }

    /// Substitute template placeholders in the argument list.
    pub fn substitute_args(&self, input_path: &Path, output_dir: &Path) -> Vec<String> {
        let input_str = input_path.to_string_lossy();
        let output_dir_str = output_dir.to_string_lossy();
        let input_dir = input_path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input_str)
                    .replace("{input_dir}", &input_dir)
                    .replace("{output_dir}", &output_dir_str)
            })
            .collect()
    }

    /// Convert `input_path` and place the artifact in `output_dir`.
    ///
    /// The extension check happens before anything is spawned: unsupported
    /// inputs fail with [`ConversionError::UnsupportedType`] and never reach
    /// the external process.
    #[instrument(skip(self), fields(input = %input_path.display()))]
    pub async fn convert(
        &self,
        input_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ConversionError> {
        if !formats::is_supported_path(input_path) {
            return Err(ConversionError::UnsupportedType {
                path: input_path.to_path_buf(),
            });
        }

        let output_name =
            formats::output_name_for(input_path).ok_or_else(|| ConversionError::UnsupportedType {
                path: input_path.to_path_buf(),
            })?;

        let beside_input = input_path
            .parent()
            .map(|p| p.join(&output_name))
            .unwrap_or_else(|| PathBuf::from(&output_name));
        let in_working_dir = self.working_dir_path()?.join(&output_name);

        let produced = {
            let _permit = self.limiter.acquire().await.map_err(|_| {
                ConversionError::Io(std::io::Error::other("converter limiter closed"))
            })?;

            // Only files written by this run count as output.
            remove_stale_output(&beside_input).await?;
            let previous = modified_time(&in_working_dir).await;

            self.run(input_path, output_dir).await?;
            locate_output(&beside_input, &in_working_dir, previous).await?
        };

        let destination = output_dir.join(&output_name);
        if produced != destination {
            FsUtils::move_file(&produced, &destination).await?;
        }

        let size = tokio::fs::metadata(&destination).await?.len();
        if size < self.min_output_bytes {
            return Err(ConversionError::OutputEmpty { path: destination });
        }

        info!(
            output = %destination.display(),
            size_bytes = size,
            "Conversion produced artifact"
        );
        Ok(destination)
    }

    /// Spawn the converter and wait for it, bounded by the deadline.
    async fn run(&self, input_path: &Path, output_dir: &Path) -> Result<(), ConversionError> {
        let args = self.substitute_args(input_path, output_dir);

        let (stdout_cfg, stderr_cfg) = if self.capture_output {
            (Stdio::piped(), Stdio::piped())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(stdout_cfg)
            .stderr(stderr_cfg)
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            program = %self.program,
            args = ?args,
            timeout_s = self.timeout_seconds,
            "Spawning converter"
        );

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %self.program, error = %e, "Failed to spawn converter");
            ConversionError::ConversionFailed {
                code: -1,
                stderr: e.to_string(),
            }
        })?;

        // Drain pipes concurrently so a chatty converter cannot block on a full pipe.
        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let timeout = Duration::from_secs(self.timeout_seconds);

        // The deadline covers the drain too: a detached grandchild can keep
        // the pipes open after the converter itself has exited.
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await?;
            let stdout_str = (&mut stdout_task).await.unwrap_or_default();
            let stderr_str = (&mut stderr_task).await.unwrap_or_default();
            Ok::<_, std::io::Error>((status, stdout_str, stderr_str))
        })
        .await;

        let (status, stdout_str, stderr_str) = match finished {
            Ok(result) => result?,
            Err(_) => {
                error!(timeout_s = self.timeout_seconds, "Converter timed out, killing");
                stdout_task.abort();
                stderr_task.abort();
                if let Ok(None) = child.try_wait() {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill converter process");
                    }
                }
                return Err(ConversionError::ConversionTimedOut {
                    timeout_seconds: self.timeout_seconds,
                });
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if !stdout_str.is_empty() {
            debug!(stdout = %stdout_str, "Converter stdout output");
        }

        if status.success() {
            info!(elapsed_ms, "Converter completed");
            Ok(())
        } else {
            let code = status.code().unwrap_or(-1);
            error!(code, elapsed_ms, stderr = %stderr_str, "Converter failed");
            Err(ConversionError::ConversionFailed {
                code,
                stderr: stderr_str.chars().take(MAX_STDERR_CHARS).collect(),
            })
        }
    }

    /// Directory the converter process runs in.
    fn working_dir_path(&self) -> Result<PathBuf, ConversionError> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Check whether the converter program can be found.
    pub async fn check_available(&self) -> bool {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            let resolved = match &self.working_dir {
                Some(dir) if program.is_relative() => dir.join(program),
                _ => program.to_path_buf(),
            };
            return resolved.is_file();
        }

        let lookup = if cfg!(target_os = "windows") { "where" } else { "which" };
        match Command::new(lookup)
            .arg(&self.program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    /// Number of converter slots currently free.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }
}

/// Find the artifact the converter wrote.
///
/// Looks next to the input first, then in the converter's working directory,
/// where wrapper scripts that convert relative to their current directory
/// leave it. The working directory is shared, so a file there is accepted
/// only if it appeared or changed since `previous` was sampled.
async fn locate_output(
    beside_input: &Path,
    in_working_dir: &Path,
    previous: Option<SystemTime>,
) -> Result<PathBuf, ConversionError> {
    if tokio::fs::try_exists(beside_input).await? {
        return Ok(beside_input.to_path_buf());
    }

    if let Some(modified) = modified_time(in_working_dir).await {
        if previous != Some(modified) {
            return Ok(in_working_dir.to_path_buf());
        }
        warn!(path = %in_working_dir.display(), "Ignoring stale artifact in working directory");
    }

    Err(ConversionError::OutputMissing {
        path: beside_input.to_path_buf(),
    })
}

/// Remove an artifact left beside the input before the converter ran,
/// e.g. one shipped inside the uploaded archive.
async fn remove_stale_output(path: &Path) -> Result<(), ConversionError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed pre-existing artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Read an optional child pipe to a lossy UTF-8 string.
async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(program: &str, args: &[&str]) -> ConversionConfig {
        ConversionConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_substitute_args() {
        let invoker = ConverterInvoker::new(&config_for(
            "convert",
            &["--in", "{input}", "--dir", "{input_dir}", "--out", "{output_dir}"],
        ));
        let args = invoker.substitute_args(Path::new("/w/job/car.fbx"), Path::new("/w/out"));
        assert_eq!(
            args,
            vec!["--in", "/w/job/car.fbx", "--dir", "/w/job", "--out", "/w/out"]
        );
    }

    #[tokio::test]
    async fn test_unsupported_extension_rejected_before_spawn() {
        // A program that cannot exist: reaching spawn would yield ConversionFailed.
        let invoker = ConverterInvoker::new(&config_for("/nonexistent/converter", &["{input}"]));
        let result = invoker
            .convert(Path::new("/tmp/model.txt"), Path::new("/tmp"))
            .await;
        assert!(matches!(result, Err(ConversionError::UnsupportedType { .. })));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_conversion_failed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("model.obj");
        std::fs::write(&input, b"v 0 0 0").expect("write");

        let invoker = ConverterInvoker::new(&config_for("/nonexistent/converter", &["{input}"]));
        let result = invoker.convert(&input, temp.path()).await;
        assert!(matches!(
            result,
            Err(ConversionError::ConversionFailed { code: -1, .. })
        ));
    }

    #[tokio::test]
    async fn test_check_available_missing_path() {
        let invoker = ConverterInvoker::new(&config_for("/nonexistent/bin/convert", &[]));
        assert!(!invoker.check_available().await);
    }

    #[test]
    fn test_slots_follow_config() {
        let config = ConversionConfig {
            max_concurrent_conversions: 2,
            ..Default::default()
        };
        let invoker = ConverterInvoker::new(&config);
        assert_eq!(invoker.available_slots(), 2);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script and return its path.
        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = std::fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        #[tokio::test]
        async fn test_convert_relocates_artifact_into_output_dir() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(
                temp.path(),
                "fake.sh",
                r#"printf 'glTF-binary' > "$(dirname "$1")/$(basename "$1" | sed 's/\.[^.]*$//').glb""#,
            );
            let job = temp.path().join("job");
            let out = temp.path().join("out");
            std::fs::create_dir_all(&job).expect("mkdir");
            std::fs::create_dir_all(&out).expect("mkdir");
            let input = job.join("robot.dae");
            std::fs::write(&input, b"<COLLADA/>").expect("write");

            let invoker =
                ConverterInvoker::new(&config_for(tool.to_str().expect("utf8"), &["{input}"]));
            let artifact = invoker.convert(&input, &out).await.expect("convert");

            assert_eq!(artifact, out.join("robot.glb"));
            assert_eq!(std::fs::read(&artifact).expect("read"), b"glTF-binary");
            assert!(!job.join("robot.glb").exists());
        }

        #[tokio::test]
        async fn test_output_found_in_working_dir() {
            let temp = tempfile::tempdir().expect("tempdir");
            let cwd = temp.path().join("cwd");
            let job = temp.path().join("job");
            std::fs::create_dir_all(&cwd).expect("mkdir");
            std::fs::create_dir_all(&job).expect("mkdir");
            let tool = script(temp.path(), "cwd.sh", "printf 'glb' > part.glb");
            let input = job.join("part.stl");
            std::fs::write(&input, b"solid").expect("write");

            let config = ConversionConfig {
                working_dir: Some(cwd.clone()),
                ..config_for(tool.to_str().expect("utf8"), &["{input}"])
            };
            let invoker = ConverterInvoker::new(&config);
            let artifact = invoker.convert(&input, &job).await.expect("convert");

            assert_eq!(artifact, job.join("part.glb"));
            assert!(!cwd.join("part.glb").exists());
        }

        #[tokio::test]
        async fn test_non_zero_exit_carries_stderr() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "fail.sh", "echo 'bad mesh' >&2; exit 3");
            let input = temp.path().join("m.ply");
            std::fs::write(&input, b"ply").expect("write");

            let invoker =
                ConverterInvoker::new(&config_for(tool.to_str().expect("utf8"), &["{input}"]));
            let result = invoker.convert(&input, temp.path()).await;

            match result {
                Err(ConversionError::ConversionFailed { code, stderr }) => {
                    assert_eq!(code, 3);
                    assert!(stderr.contains("bad mesh"));
                }
                other => panic!("expected ConversionFailed, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_success_without_artifact_is_output_missing() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "noop.sh", "exit 0");
            let input = temp.path().join("m.x3d");
            std::fs::write(&input, b"x3d").expect("write");

            let config = ConversionConfig {
                working_dir: Some(temp.path().to_path_buf()),
                ..config_for(tool.to_str().expect("utf8"), &["{input}"])
            };
            let result = ConverterInvoker::new(&config)
                .convert(&input, temp.path())
                .await;
            assert!(matches!(result, Err(ConversionError::OutputMissing { .. })));
        }

        #[tokio::test]
        async fn test_empty_artifact_is_rejected() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "empty.sh", r#": > "$(dirname "$1")/m.glb""#);
            let input = temp.path().join("m.usd");
            std::fs::write(&input, b"usd").expect("write");

            let result =
                ConverterInvoker::new(&config_for(tool.to_str().expect("utf8"), &["{input}"]))
                    .convert(&input, temp.path())
                    .await;
            assert!(matches!(result, Err(ConversionError::OutputEmpty { .. })));
        }

        #[tokio::test]
        async fn test_hung_converter_is_killed_at_deadline() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "hang.sh", "exec sleep 30");
            let input = temp.path().join("m.abc");
            std::fs::write(&input, b"abc").expect("write");

            let config = ConversionConfig {
                timeout_seconds: 1,
                ..config_for(tool.to_str().expect("utf8"), &["{input}"])
            };
            let started = Instant::now();
            let result = ConverterInvoker::new(&config)
                .convert(&input, temp.path())
                .await;

            assert!(matches!(
                result,
                Err(ConversionError::ConversionTimedOut { timeout_seconds: 1 })
            ));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_detached_child_holding_pipes_hits_deadline() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "detach.sh", "sleep 6 &\nexit 0");
            let input = temp.path().join("m.obj");
            std::fs::write(&input, b"v 0 0 0").expect("write");

            let config = ConversionConfig {
                timeout_seconds: 1,
                ..config_for(tool.to_str().expect("utf8"), &["{input}"])
            };
            let started = Instant::now();
            let result = ConverterInvoker::new(&config)
                .convert(&input, temp.path())
                .await;

            assert!(matches!(
                result,
                Err(ConversionError::ConversionTimedOut { timeout_seconds: 1 })
            ));
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[tokio::test]
        async fn test_artifact_shipped_beside_input_is_not_output() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "noop.sh", "exit 0");
            let job = temp.path().join("job");
            std::fs::create_dir_all(&job).expect("mkdir");
            let input = job.join("car.fbx");
            std::fs::write(&input, b"fbx").expect("write");
            std::fs::write(job.join("car.glb"), b"glTF-from-upload").expect("write");

            let config = ConversionConfig {
                working_dir: Some(temp.path().to_path_buf()),
                ..config_for(tool.to_str().expect("utf8"), &["{input}"])
            };
            let result = ConverterInvoker::new(&config).convert(&input, &job).await;

            assert!(matches!(result, Err(ConversionError::OutputMissing { .. })));
            assert!(!job.join("car.glb").exists());
        }

        #[tokio::test]
        async fn test_stale_artifact_in_working_dir_is_ignored() {
            let temp = tempfile::tempdir().expect("tempdir");
            let cwd = temp.path().join("cwd");
            let job = temp.path().join("job");
            std::fs::create_dir_all(&cwd).expect("mkdir");
            std::fs::create_dir_all(&job).expect("mkdir");
            std::fs::write(cwd.join("part.glb"), b"left over").expect("write");
            let tool = script(temp.path(), "noop.sh", "exit 0");
            let input = job.join("part.stl");
            std::fs::write(&input, b"solid").expect("write");

            let config = ConversionConfig {
                working_dir: Some(cwd.clone()),
                ..config_for(tool.to_str().expect("utf8"), &["{input}"])
            };
            let result = ConverterInvoker::new(&config).convert(&input, &job).await;

            assert!(matches!(result, Err(ConversionError::OutputMissing { .. })));
            assert!(cwd.join("part.glb").exists());
        }

        #[tokio::test]
        async fn test_unsupported_type_spawns_nothing() {
            let temp = tempfile::tempdir().expect("tempdir");
            let marker = temp.path().join("spawned");
            let tool = script(
                temp.path(),
                "marker.sh",
                &format!("touch '{}'", marker.display()),
            );
            let input = temp.path().join("archive.rar");
            std::fs::write(&input, b"rar").expect("write");

            let result =
                ConverterInvoker::new(&config_for(tool.to_str().expect("utf8"), &["{input}"]))
                    .convert(&input, temp.path())
                    .await;

            assert!(matches!(result, Err(ConversionError::UnsupportedType { .. })));
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn test_check_available_existing_script() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = script(temp.path(), "ok.sh", "exit 0");
            let invoker = ConverterInvoker::new(&config_for(tool.to_str().expect("utf8"), &[]));
            assert!(invoker.check_available().await);
        }
    }
}
