//! Transform invoker - runs the external cropping tool against one image.
//!
//! The tool is a black box speaking a file-and-exit-code protocol:
//! `<program> [script] <source> <destination> <parameter>`, exit 0 and an
//! existing destination file mean success.

use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::common::errors::{CropError, CropResult, ToolFailure, ToolFailureKind};
use crate::common::{MAX_PARAMETER, MISSING_DEPENDENCY_MARKERS};
use crate::config::AppConfig;
use crate::models::entity::Dimensions;

// ────────────────────────────────────────────────────────────────
// Contract
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub parameter: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Success { path: PathBuf, dimensions: Dimensions },
    Failure(ToolFailure),
}

impl TransformOutcome {
    pub fn into_result(self) -> CropResult<(PathBuf, Dimensions)> {
        match self {
            TransformOutcome::Success { path, dimensions } => Ok((path, dimensions)),
            TransformOutcome::Failure(failure) => Err(CropError::Tool(failure)),
        }
    }
}

/// The pixel algorithm behind a seam: a subprocess here, anything else in
/// tests or future backends. Implementations must never modify `source`.
pub trait Transformer: Send + Sync {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> BoxFuture<'a, TransformOutcome>;

    /// Human-readable description of the resolved backend, for startup logs.
    fn probe(&self) -> BoxFuture<'_, Result<String, ToolFailure>> {
        Box::pin(async { Ok("in-process transformer".to_string()) })
    }
}

// ────────────────────────────────────────────────────────────────
// Subprocess implementation
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ResolvedTool {
    program: String,
    version: String,
}

pub struct SubprocessTransformer {
    candidates: Vec<String>,
    probe_args: Vec<String>,
    script: Option<PathBuf>,
    probe_timeout: Duration,
    invoker_timeout: Duration,
    resolved: OnceCell<ResolvedTool>,
}

impl SubprocessTransformer {
    pub fn new(
        candidates: Vec<String>,
        probe_args: Vec<String>,
        script: Option<PathBuf>,
        probe_timeout: Duration,
        invoker_timeout: Duration,
    ) -> Self {
        Self {
            candidates,
            probe_args,
            script,
            probe_timeout,
            invoker_timeout,
            resolved: OnceCell::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.tool_candidates.clone(),
            config.tool_probe_args.clone(),
            config.tool_script.clone(),
            config.probe_timeout(),
            config.invoker_timeout(),
        )
    }

    /// First candidate answering the probe, cached for the process lifetime.
    /// A failed resolution is not cached so a later install is picked up.
    async fn resolve(&self) -> Result<&ResolvedTool, ToolFailure> {
        self.resolved
            .get_or_try_init(|| async {
                for candidate in &self.candidates {
                    match self.probe_candidate(candidate).await {
                        Some(version) => {
                            info!("Cropping tool resolved to `{}` ({})", candidate, version);
                            return Ok(ResolvedTool {
                                program: candidate.clone(),
                                version,
                            });
                        }
                        None => debug!("Candidate `{}` did not answer the probe", candidate),
                    }
                }
                Err(ToolFailure::new(
                    ToolFailureKind::NotFound,
                    format!("none of {:?} responded to {:?}", self.candidates, self.probe_args),
                ))
            })
            .await
    }

    async fn probe_candidate(&self, candidate: &str) -> Option<String> {
        let mut cmd = create_quiet_command(candidate);
        cmd.args(&self.probe_args);
        match tokio::time::timeout(self.probe_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                // Older interpreters print their version on stderr.
                let text = if output.stdout.is_empty() {
                    String::from_utf8_lossy(&output.stderr).into_owned()
                } else {
                    String::from_utf8_lossy(&output.stdout).into_owned()
                };
                Some(text.lines().next().unwrap_or("unknown version").trim().to_string())
            }
            _ => None,
        }
    }

    fn build_args(&self, request: &TransformRequest, parameter: u32) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(script) = &self.script {
            args.push(script.to_string_lossy().into_owned());
        }
        args.push(request.source.to_string_lossy().into_owned());
        args.push(request.destination.to_string_lossy().into_owned());
        args.push(parameter.to_string());
        args
    }

    async fn run(&self, request: &TransformRequest) -> Result<Dimensions, ToolFailure> {
        let parameter = request.parameter.min(MAX_PARAMETER);
        if let Some(script) = &self.script {
            if tokio::fs::metadata(script).await.is_err() {
                return Err(ToolFailure::new(
                    ToolFailureKind::NotFound,
                    format!("script {:?} does not exist", script),
                ));
            }
        }
        if tokio::fs::metadata(&request.source).await.is_err() {
            return Err(ToolFailure::new(
                ToolFailureKind::NonZeroExit,
                format!("source image {:?} does not exist", request.source),
            ));
        }

        let tool = self.resolve().await?;
        let args = self.build_args(request, parameter);
        let start_time = Instant::now();

        let mut cmd = create_quiet_command(&tool.program);
        cmd.args(&args);
        let child = cmd.spawn().map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ToolFailureKind::NotFound
            } else {
                ToolFailureKind::NonZeroExit
            };
            ToolFailure::new(kind, format!("failed to spawn `{}`: {}", tool.program, err))
        })?;

        // Dropping the wait future drops the child, and `kill_on_drop` reaps it.
        let output = match tokio::time::timeout(self.invoker_timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(ToolFailure::new(
                    ToolFailureKind::NonZeroExit,
                    format!("failed to collect tool output: {err}"),
                ));
            }
            Err(_) => {
                warn!(
                    "Cropping tool exceeded {:?} on {:?}",
                    self.invoker_timeout, request.source
                );
                return Err(ToolFailure::new(
                    ToolFailureKind::TimedOut,
                    format!("no result within {:?}", self.invoker_timeout),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            duration = &*format!("{:?}", start_time.elapsed());
            "{} {:?} exited with {}\n{}{}",
            tool.program, args, output.status, stdout, stderr
        );

        if !output.status.success() {
            return Err(classify_failure(&output.status.to_string(), &stdout, &stderr));
        }
        if tokio::fs::metadata(&request.destination).await.is_err() {
            return Err(ToolFailure::new(
                ToolFailureKind::NonZeroExit,
                "tool exited successfully but produced no output file",
            ));
        }

        let dimensions = read_dimensions(&request.destination).await.map_err(|err| {
            ToolFailure::new(
                ToolFailureKind::NonZeroExit,
                format!("output is not a readable image: {err}"),
            )
        })?;
        info!(
            duration = &*format!("{:?}", start_time.elapsed());
            "Cropped {:?} -> {} (parameter {}, {})",
            request.source.file_name().unwrap_or_default(), dimensions, parameter, tool.version
        );
        Ok(dimensions)
    }
}

impl Transformer for SubprocessTransformer {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> BoxFuture<'a, TransformOutcome> {
        Box::pin(async move {
            match self.run(request).await {
                Ok(dimensions) => TransformOutcome::Success {
                    path: request.destination.clone(),
                    dimensions,
                },
                Err(failure) => TransformOutcome::Failure(failure),
            }
        })
    }

    fn probe(&self) -> BoxFuture<'_, Result<String, ToolFailure>> {
        Box::pin(async move {
            let tool = self.resolve().await?;
            Ok(format!("{} ({})", tool.program, tool.version))
        })
    }
}

// ────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────

/// A command with no stdin, captured output, and a child that dies with
/// the future awaiting it.
pub fn create_quiet_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

fn classify_failure(status: &str, stdout: &str, stderr: &str) -> ToolFailure {
    let mentions_missing = |text: &str| MISSING_DEPENDENCY_MARKERS.iter().any(|m| text.contains(m));
    let tail = last_meaningful_line(stderr)
        .or_else(|| last_meaningful_line(stdout))
        .unwrap_or("no output");
    if mentions_missing(stderr) || mentions_missing(stdout) {
        ToolFailure::new(ToolFailureKind::MissingDependency, tail)
    } else {
        ToolFailure::new(ToolFailureKind::NonZeroExit, format!("{status}: {tail}"))
    }
}

fn last_meaningful_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).last()
}

/// Read width and height from the image header without decoding pixels.
pub async fn read_dimensions(path: &Path) -> anyhow::Result<Dimensions> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> anyhow::Result<Dimensions> {
        let (width, height) = image::ImageReader::open(&path)?
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(Dimensions::new(width, height))
    })
    .await?
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]))
            .save(path)
            .unwrap();
    }

    fn transformer(candidates: &[&str], script: Option<PathBuf>, timeout: Duration) -> SubprocessTransformer {
        SubprocessTransformer::new(
            candidates.iter().map(|s| s.to_string()).collect(),
            vec!["-c".to_string(), "exit 0".to_string()],
            script,
            Duration::from_secs(5),
            timeout,
        )
    }

    fn request(dir: &Path, parameter: u32) -> TransformRequest {
        let source = dir.join("source.png");
        write_png(&source, 8, 6);
        TransformRequest {
            source,
            destination: dir.join("out.png"),
            parameter,
        }
    }

    #[tokio::test]
    async fn success_reads_destination_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "crop.sh", r#"cp "$1" "$2""#);
        let req = request(dir.path(), 40);
        let tool = transformer(&["/nonexistent/sh", "/bin/sh"], Some(script), Duration::from_secs(10));

        let outcome = tool.transform(&req).await;

        assert_eq!(
            outcome,
            TransformOutcome::Success {
                path: req.destination.clone(),
                dimensions: Dimensions::new(8, 6)
            }
        );
        assert!(req.source.exists());
    }

    #[tokio::test]
    async fn parameter_is_clamped_before_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "crop.sh",
            r#"echo "$3" > "$(dirname "$2")/param.txt"; cp "$1" "$2""#,
        );
        let req = request(dir.path(), 250);
        transformer(&["/bin/sh"], Some(script), Duration::from_secs(10))
            .transform(&req)
            .await
            .into_result()
            .unwrap();
        let seen = std::fs::read_to_string(dir.path().join("param.txt")).unwrap();
        assert_eq!(seen.trim(), "100");
    }

    #[tokio::test]
    async fn no_responding_candidate_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "crop.sh", "exit 0");
        let req = request(dir.path(), 40);
        let outcome = transformer(&["/nonexistent/a", "/nonexistent/b"], Some(script), Duration::from_secs(5))
            .transform(&req)
            .await;
        assert!(matches!(
            outcome,
            TransformOutcome::Failure(ToolFailure { kind: ToolFailureKind::NotFound, .. })
        ));
    }

    #[tokio::test]
    async fn missing_script_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), 40);
        let outcome = transformer(&["/bin/sh"], Some(dir.path().join("gone.py")), Duration::from_secs(5))
            .transform(&req)
            .await;
        assert!(matches!(
            outcome,
            TransformOutcome::Failure(ToolFailure { kind: ToolFailureKind::NotFound, .. })
        ));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "crop.sh", "sleep 5");
        let req = request(dir.path(), 40);
        let outcome = transformer(&["/bin/sh"], Some(script), Duration::from_millis(200))
            .transform(&req)
            .await;
        assert!(matches!(
            outcome,
            TransformOutcome::Failure(ToolFailure { kind: ToolFailureKind::TimedOut, .. })
        ));
        assert!(!req.destination.exists());
    }

    #[tokio::test]
    async fn import_error_is_missing_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "crop.sh",
            "echo \"ModuleNotFoundError: No module named 'PIL'\" >&2; exit 1",
        );
        let req = request(dir.path(), 40);
        let outcome = transformer(&["/bin/sh"], Some(script), Duration::from_secs(5))
            .transform(&req)
            .await;
        assert!(matches!(
            outcome,
            TransformOutcome::Failure(ToolFailure { kind: ToolFailureKind::MissingDependency, .. })
        ));
    }

    #[tokio::test]
    async fn clean_exit_without_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "crop.sh", "echo STATUS: SUCCESS; exit 0");
        let req = request(dir.path(), 40);
        let outcome = transformer(&["/bin/sh"], Some(script), Duration::from_secs(5))
            .transform(&req)
            .await;
        assert!(matches!(
            outcome,
            TransformOutcome::Failure(ToolFailure { kind: ToolFailureKind::NonZeroExit, .. })
        ));
    }

    #[test]
    fn failure_detail_prefers_last_stderr_line() {
        let failure = classify_failure("exit status: 1", "ERROR: boom\n", "trace\nValueError: bad\n\n");
        assert_eq!(failure.kind, ToolFailureKind::NonZeroExit);
        assert!(failure.detail.ends_with("ValueError: bad"));
    }
}
