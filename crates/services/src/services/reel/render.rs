//! Render executor: one ffmpeg child process per [`EngineInvocation`].

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{io::AsyncReadExt, process::Command};
use tokio_util::sync::CancellationToken;

use super::compiler::EngineInvocation;

/// stderr fragments meaning an input could not be opened.
const MISSING_MEDIA_MARKERS: [&str; 3] = [
    "No such file or directory",
    "Permission denied",
    "Invalid data found when processing input",
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),
    #[error("Engine exited with code {exit_code:?}")]
    EngineFailure {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("Render cancelled")]
    Cancelled,
    #[error("Failed to spawn engine: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub output: PathBuf,
    pub stderr: String,
    pub elapsed_ms: u64,
}

/// Anything that can execute a compiled invocation. The production engine
/// shells out to ffmpeg; tests substitute a recorder.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn run(
        &self,
        invocation: &EngineInvocation,
        cancel: &CancellationToken,
    ) -> Result<RenderOutput, RenderError>;
}

pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Locate ffmpeg via an optional override, then `PATH`.
    pub fn discover(override_path: Option<&str>) -> Self {
        Self::new(utils::shell::binary_or_default("ffmpeg", override_path))
    }

    pub fn path(&self) -> &Path {
        &self.ffmpeg_path
    }
}

#[async_trait]
impl RenderEngine for FfmpegEngine {
    async fn run(
        &self,
        invocation: &EngineInvocation,
        cancel: &CancellationToken,
    ) -> Result<RenderOutput, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        if let Some(parent) = invocation.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::debug!(
            stage = ?invocation.stage,
            "{} {}",
            self.ffmpeg_path.display(),
            invocation.args.join(" ")
        );

        let started = Instant::now();
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_pipe = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).to_string()
        });

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let status = match exited {
            Some(status) => status?,
            None => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill ffmpeg after cancellation: {}", e);
                }
                stderr_reader.abort();
                return Err(RenderError::Cancelled);
            }
        };

        let stderr = stderr_reader.await.unwrap_or_default();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.success() {
            tracing::debug!(stage = ?invocation.stage, elapsed_ms, "ffmpeg finished");
            return Ok(RenderOutput {
                output: invocation.output.clone(),
                stderr,
                elapsed_ms,
            });
        }

        Err(classify_failure(status.code(), stderr))
    }
}

/// Map a non-zero exit to the error taxonomy.
pub fn classify_failure(exit_code: Option<i32>, stderr: String) -> RenderError {
    let missing = stderr
        .lines()
        .find(|line| MISSING_MEDIA_MARKERS.iter().any(|m| line.contains(m)));

    match missing {
        Some(line) => RenderError::MediaUnavailable(line.trim().to_string()),
        None => RenderError::EngineFailure { exit_code, stderr },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{sync::Mutex, time::Duration};

    use super::*;

    /// Records every invocation and fakes its output file. Inputs must exist;
    /// outputs matching one of `fail_patterns` fail with exit code 1.
    #[derive(Default)]
    pub struct RecordingEngine {
        calls: Mutex<Vec<EngineInvocation>>,
        completed: Mutex<Vec<PathBuf>>,
        fail_patterns: Vec<String>,
        delay: Option<Duration>,
        delays_on: Vec<(String, Duration)>,
    }

    impl RecordingEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(patterns: &[&str]) -> Self {
            Self {
                fail_patterns: patterns.iter().map(|p| p.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Outputs containing `pattern` take `delay` instead of the default.
        pub fn with_delay_on(mut self, pattern: &str, delay: Duration) -> Self {
            self.delays_on.push((pattern.to_string(), delay));
            self
        }

        pub fn calls(&self) -> Vec<EngineInvocation> {
            self.calls.lock().unwrap().clone()
        }

        /// Outputs written so far, in completion order.
        pub fn completed(&self) -> Vec<PathBuf> {
            self.completed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RenderEngine for RecordingEngine {
        async fn run(
            &self,
            invocation: &EngineInvocation,
            cancel: &CancellationToken,
        ) -> Result<RenderOutput, RenderError> {
            self.calls.lock().unwrap().push(invocation.clone());

            let output = invocation.output.to_string_lossy();
            let delay = self
                .delays_on
                .iter()
                .find(|(pattern, _)| output.contains(pattern.as_str()))
                .map(|(_, delay)| *delay)
                .or(self.delay);
            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RenderError::Cancelled),
                }
            }
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }

            for input in &invocation.inputs {
                if !input.exists() {
                    return Err(classify_failure(
                        Some(1),
                        format!("{}: No such file or directory", input.display()),
                    ));
                }
            }

            if self.fail_patterns.iter().any(|p| output.contains(p.as_str())) {
                return Err(RenderError::EngineFailure {
                    exit_code: Some(1),
                    stderr: "Conversion failed!".to_string(),
                });
            }

            if let Some(parent) = invocation.output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&invocation.output, b"rendered")?;
            self.completed
                .lock()
                .unwrap()
                .push(invocation.output.clone());

            Ok(RenderOutput {
                output: invocation.output.clone(),
                stderr: String::new(),
                elapsed_ms: 0,
            })
        }
    }
}
