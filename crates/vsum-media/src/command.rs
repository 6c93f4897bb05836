//! External command builder and the time-bounded stage executor.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Builder for an external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Program name or path
    program: String,
    /// Arguments, in order
    args: Vec<String>,
}

impl StageCommand {
    /// Create a new command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a path argument.
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().to_string();
        self.arg(path)
    }

    /// Add a flag followed by its value.
    pub fn option(self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn build_args(&self) -> &[String] {
        &self.args
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    /// Exit status was zero
    pub success: bool,
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout (lossy UTF-8)
    pub stdout: String,
    /// Captured stderr (lossy UTF-8)
    pub stderr: String,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl StageOutput {
    /// Last few lines of stderr, for log lines.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs one external command with a wall-clock bound.
///
/// The executor only reports what happened: it does not look for output
/// artifacts and it never deletes anything from the working directory.
#[derive(Debug, Clone, Default)]
pub struct StageExecutor;

impl StageExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `cmd` inside `working_dir`, killing it if `timeout` elapses.
    ///
    /// Returns:
    /// - `Ok(StageOutput)` when the process exited, successfully or not
    /// - `Err(MediaError::SpawnFailed)` when the process could not start
    /// - `Err(MediaError::Timeout)` when the deadline passed (process killed)
    pub async fn run(
        &self,
        cmd: &StageCommand,
        working_dir: &Path,
        timeout: Duration,
    ) -> MediaResult<StageOutput> {
        if !working_dir.is_dir() {
            return Err(MediaError::WorkingDirNotFound(working_dir.to_path_buf()));
        }

        debug!(
            cwd = %working_dir.display(),
            timeout_secs = timeout.as_secs(),
            "Running: {}",
            cmd.display()
        );

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut command = Command::new(cmd.program());
        command
            .args(cmd.build_args())
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so helpers the tool forks can be killed with it.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| MediaError::spawn_failed(cmd.program(), e))?;
        let pgid = child.id();

        let mut stdout_handle = child.stdout.take().map(spawn_reader);
        let mut stderr_handle = child.stderr.take().map(spawn_reader);

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "{} timed out after {:?}, killing process",
                    cmd.program(),
                    timeout
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", cmd.program(), e);
                }
                kill_process_group(pgid);
                abort_reader(stdout_handle);
                abort_reader(stderr_handle);
                return Err(MediaError::timeout(cmd.program(), timeout));
            }
        };

        // A forked helper can keep the pipes open after the tool itself exits.
        let drained = tokio::time::timeout_at(deadline, async {
            let stdout = collect_reader(stdout_handle.as_mut()).await;
            let stderr = collect_reader(stderr_handle.as_mut()).await;
            (stdout, stderr)
        })
        .await;

        let (stdout, stderr) = match drained {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    "{} exited but its output was still open after {:?}, killing process group",
                    cmd.program(),
                    timeout
                );
                kill_process_group(pgid);
                abort_reader(stdout_handle);
                abort_reader(stderr_handle);
                return Err(MediaError::timeout(cmd.program(), timeout));
            }
        };

        let elapsed = started.elapsed();

        let output = StageOutput {
            success: status.success(),
            exit_code: status.code(),
            stdout,
            stderr,
            elapsed,
        };

        if output.success {
            debug!(
                "{} finished in {:.2}s",
                cmd.program(),
                elapsed.as_secs_f64()
            );
        } else {
            warn!(
                exit_code = ?output.exit_code,
                "{} exited with failure after {:.2}s: {}",
                cmd.program(),
                elapsed.as_secs_f64(),
                output.stderr_tail(5)
            );
        }

        Ok(output)
    }
}

fn spawn_reader<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Output pipe closed early: {}", e);
        }
        buf
    })
}

async fn collect_reader(handle: Option<&mut JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(handle) => {
            let bytes = handle.await.unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }
        None => String::new(),
    }
}

fn abort_reader(handle: Option<JoinHandle<Vec<u8>>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else { return };
    // ESRCH just means every member already exited.
    if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        debug!("Process group {} not signalled: {}", pgid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>) {}

/// Resolve a tool on PATH.
pub fn check_tool(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ToolNotFound(program.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = StageCommand::new("ffmpeg")
            .arg("-y")
            .option("-i", "in.mp4")
            .path_arg(Path::new("/tmp/out.wav"));

        assert_eq!(cmd.program(), "ffmpeg");
        assert_eq!(cmd.build_args(), &["-y", "-i", "in.mp4", "/tmp/out.wav"]);
        assert_eq!(cmd.display(), "ffmpeg -y -i in.mp4 /tmp/out.wav");
    }

    #[test]
    fn test_stderr_tail() {
        let output = StageOutput {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "a\nb\nc\nd".to_string(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(output.stderr_tail(2), "c\nd");
        assert_eq!(output.stderr_tail(10), "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::new("sh").args(["-c", "echo out; echo err >&2"]);

        let output = StageExecutor::new()
            .run(&cmd, dir.path(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_uses_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::new("sh").args(["-c", "echo data > artifact.txt"]);

        let output = StageExecutor::new()
            .run(&cmd, dir.path(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(output.success);
        assert!(dir.path().join("artifact.txt").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::new("sh").args(["-c", "exit 3"]);

        let output = StageExecutor::new()
            .run(&cmd, dir.path(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::new("vsum-definitely-not-a-real-tool");

        let err = StageExecutor::new()
            .run(&cmd, dir.path(), Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(err.is_spawn_failure());
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::new("sleep").arg("30");

        let started = Instant::now();
        let err = StageExecutor::new()
            .run(&cmd, dir.path(), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(!err.is_spawn_failure());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_covers_forked_helper_holding_output() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::new("sh").args(["-c", "sleep 20 & exit 0"]);

        let started = Instant::now();
        let err = StageExecutor::new()
            .run(&cmd, dir.path(), Duration::from_millis(500))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let cmd = StageCommand::new("true");

        let err = StageExecutor::new()
            .run(&cmd, &missing, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::WorkingDirNotFound(_)));
    }
}
