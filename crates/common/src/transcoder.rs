//! External transcoder process management.
//!
//! The transcoder's exit code and stderr are its only error channel, so every
//! process keeps a bounded tail of its stderr for error reports. Stderr is
//! drained concurrently so the child never blocks on a full pipe.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::{GoliveError, GoliveResult};

/// The last `capacity` stderr lines of a process.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Retained lines joined with newlines.
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Which standard streams the caller wants piped.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipes {
    pub stdin: bool,
    pub stdout: bool,
}

/// A running transcoder child process.
#[derive(Debug)]
pub struct TranscoderProcess {
    label: String,
    child: Child,
    tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl TranscoderProcess {
    /// Spawn `program` with `args`.
    ///
    /// The child is killed if the handle is dropped without a clean shutdown.
    pub fn spawn(
        program: &Path,
        args: &[String],
        label: impl Into<String>,
        pipes: Pipes,
        tail_lines: usize,
    ) -> GoliveResult<Self> {
        let label = label.into();
        // Arguments may carry stream keys; only their count is logged.
        tracing::debug!(process = %label, args = args.len(), "Spawning transcoder");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if pipes.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if pipes.stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GoliveError::transcoder(format!(
                "Failed to start {} for {label}: {e}",
                program.display()
            ))
        })?;

        let tail = StderrTail::new(tail_lines);
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = tail.clone();
            let label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            tracing::trace!(process = %label, "{line}");
                            tail.push(line);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tail.push(format!("<failed to read stderr: {e}>"));
                            break;
                        }
                    }
                }
            })
        });

        tracing::info!(process = %label, pid = child.id(), "Transcoder process started");

        Ok(Self {
            label,
            child,
            tail,
            stderr_task,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn stderr_tail(&self) -> String {
        self.tail.snapshot()
    }

    /// Returns the exit status if the process has already exited.
    pub fn try_exited(&mut self) -> GoliveResult<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|e| GoliveError::transcoder(format!("Failed to poll {}: {e}", self.label)))
    }

    /// Wait for exit, turning a non-zero status into an error carrying the
    /// stderr tail.
    pub async fn wait(&mut self) -> GoliveResult<()> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| GoliveError::transcoder(format!("Failed to wait on {}: {e}", self.label)))?;
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        self.check_status(status)
    }

    /// Wait up to `grace` for a clean exit, then kill.
    pub async fn shutdown(&mut self, grace: Duration) -> GoliveResult<()> {
        drop(self.child.stdin.take());
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(process = %self.label, "Transcoder did not exit in time; killing");
                self.kill().await;
                Ok(())
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(process = %self.label, error = %e, "Kill failed");
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    /// Error describing an unexpected exit.
    pub fn exit_error(&self, status: ExitStatus) -> GoliveError {
        GoliveError::transcoder(format!(
            "{} exited with {status}: {}",
            self.label,
            self.tail.snapshot().trim()
        ))
    }

    fn check_status(&self, status: ExitStatus) -> GoliveResult<()> {
        if status.success() {
            Ok(())
        } else {
            Err(self.exit_error(status))
        }
    }
}

/// Run a transcoder to completion with a time limit, returning its stdout.
pub async fn run_to_completion(
    program: &Path,
    args: &[String],
    limit: Duration,
) -> GoliveResult<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(limit, cmd.output())
        .await
        .map_err(|_| {
            GoliveError::timeout(format!(
                "{} did not finish within {} ms",
                program.display(),
                limit.as_millis()
            ))
        })?
        .map_err(|e| {
            GoliveError::transcoder(format!("Failed to run {}: {e}", program.display()))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
        return Err(GoliveError::transcoder(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join("\n")
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Version banner of the transcoder, if it runs at all.
pub async fn transcoder_version(program: &Path) -> GoliveResult<String> {
    let out = run_to_completion(program, &["-version".to_string()], Duration::from_secs(5)).await?;
    Ok(out.lines().next().unwrap_or_default().to_string())
}

/// Resolve a bare program name against `PATH`.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.exists().then(|| program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let tail = StderrTail::new(2);
        tail.push("a".into());
        tail.push("b".into());
        tail.push("c".into());
        assert_eq!(tail.snapshot(), "b\nc");
    }

    #[tokio::test]
    async fn test_missing_program_reports_transcoder_error() {
        let err = TranscoderProcess::spawn(
            Path::new("/nonexistent/golive-transcoder"),
            &[],
            "probe",
            Pipes::default(),
            4,
        )
        .unwrap_err();
        assert!(matches!(err, GoliveError::Transcoder { .. }));
    }

    #[test]
    fn test_resolve_missing_absolute_path() {
        assert!(resolve_program(Path::new("/nonexistent/dir/ffmpeg")).is_none());
    }
}
