//! Script executor for the mule worker.
//!
//! Runs setup, teardown and job scripts:
//! - Resolves the working directory (a named workspace under the configured
//!   root, or the process's current directory)
//! - Writes the script to a temporary file and runs it through the
//!   configured shell interpreter
//! - Exports the caller's environment on top of the inherited one, plus
//!   `WORKSPACE`
//! - Captures stdout, stderr and the exit code
//! - Terminates the script's process group on cancellation
//!
//! A script that fails, or one that cannot even be launched, is reported as
//! a [`ScriptResult`]; only precondition violations, cancellation and wait
//! failures surface as [`ExecutorError`].

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExecutorSettings;

/// How often a running script is checked for exit or cancellation.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exit code reported when a script could not be launched.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 1;

/// Errors from executor operations.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("workspace '{0}' requested but no workspace root is configured")]
    NoWorkspaceRoot(String),

    #[error("invalid workspace name '{0}': must be a single path component")]
    InvalidWorkspace(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl ExecutorError {
    /// Whether this error was raised before anything was run.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NoWorkspaceRoot(_) | Self::InvalidWorkspace(_))
    }
}

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Outcome of one script execution.
///
/// Produced exactly once per run and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl ScriptResult {
    /// Captured stdout, trimmed of surrounding whitespace.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured stderr, trimmed of surrounding whitespace.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Captured process output before timestamps are attached.
struct Captured {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Why a run produced no captured output.
#[derive(Debug)]
enum RunFailure {
    /// The process never started; reported as data.
    Launch(String),
    /// Propagated to the caller.
    Fault(ExecutorError),
}

impl From<ExecutorError> for RunFailure {
    fn from(err: ExecutorError) -> Self {
        RunFailure::Fault(err)
    }
}

/// The script executor.
pub struct ScriptExecutor {
    settings: ExecutorSettings,
    /// Cancellation flag
    cancelled: Arc<AtomicBool>,
    /// Scripts currently running
    running: AtomicUsize,
}

impl ScriptExecutor {
    /// Create a new executor with the given settings.
    pub fn new(settings: ExecutorSettings) -> Self {
        Self::with_cancellation(settings, Arc::new(AtomicBool::new(false)))
    }

    /// Create an executor that observes an existing cancellation flag.
    pub fn with_cancellation(settings: ExecutorSettings, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            settings,
            cancelled,
            running: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Get a cancellation flag that can be shared.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Request cancellation of the running (and any later) script.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Allow scripts to run again after a cancellation.
    pub fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether a script is running right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    /// Resolve the directory a script runs in.
    pub fn resolve_workdir(&self, workspace: Option<&str>) -> ExecutorResult<PathBuf> {
        match workspace {
            Some(name) => {
                let root = self
                    .settings
                    .workspace_root
                    .as_ref()
                    .ok_or_else(|| ExecutorError::NoWorkspaceRoot(name.to_string()))?;
                validate_workspace_name(name)?;
                Ok(root.join("workspaces").join(name))
            }
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Run `script` named `name` in `workspace` with `env` exported.
    pub fn execute(
        &self,
        name: &str,
        script: &str,
        workspace: Option<&str>,
        env: &[(&str, &str)],
    ) -> ExecutorResult<ScriptResult> {
        // Counted before the cancellation check so a shutdown waits for it.
        let _running = RunningGuard::enter(&self.running);
        let work_dir = launchable_workdir(self.resolve_workdir(workspace))?;
        if self.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = work_dir.and_then(|dir| {
            info!(script = name, "executing {} in {}", name, dir.display());
            self.run_script(name, script, &dir, env)
        });

        let finished_at = Utc::now();
        let elapsed = start.elapsed();
        info!(
            script = name,
            elapsed_ms = elapsed.as_millis() as u64,
            "script execution completed in {:.3}s",
            elapsed.as_secs_f64()
        );

        let captured = match outcome {
            Ok(captured) => captured,
            Err(RunFailure::Launch(message)) => {
                warn!(script = name, "{}", message);
                Captured {
                    stdout: String::new(),
                    stderr: message,
                    exit_code: LAUNCH_FAILURE_EXIT_CODE,
                }
            }
            Err(RunFailure::Fault(err)) => return Err(err),
        };

        Ok(ScriptResult {
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code: captured.exit_code,
            started_at,
            finished_at,
        })
    }

    fn run_script(
        &self,
        name: &str,
        script: &str,
        work_dir: &Path,
        env: &[(&str, &str)],
    ) -> Result<Captured, RunFailure> {
        std::fs::create_dir_all(work_dir).map_err(|e| {
            RunFailure::Launch(format!(
                "Error preparing working directory [{}]: {}",
                work_dir.display(),
                e
            ))
        })?;

        let mut script_file = tempfile::Builder::new()
            .prefix(name)
            .tempfile()
            .map_err(|e| RunFailure::Launch(format!("Error creating script file for {}: {}", name, e)))?;
        script_file
            .write_all(script.as_bytes())
            .and_then(|_| script_file.flush())
            .map_err(|e| RunFailure::Launch(format!("Error writing script file for {}: {}", name, e)))?;

        let cmd_display = format!(
            "{} {}",
            self.settings.interpreter.display(),
            script_file.path().display()
        );

        let mut command = Command::new(&self.settings.interpreter);
        command
            .arg(script_file.path())
            .current_dir(work_dir)
            .envs(env.iter().copied())
            .env(mule_protocol::ENV_WORKSPACE, work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so cancellation reaches the script's children.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RunFailure::Launch(format!("Error running command [{}]: {}", cmd_display, e)))?;
        debug!(script = name, pid = child.id(), "spawned {}", cmd_display);

        let pgid = child.id();
        let stdout_handle = spawn_reader(child.stdout.take());
        let stderr_handle = spawn_reader(child.stderr.take());

        let status = match self.wait_for_exit(&mut child, &cmd_display) {
            Ok(status) => status,
            Err(err) => {
                let _ = collect(stdout_handle);
                let _ = collect(stderr_handle);
                return Err(err);
            }
        };

        let (stdout, stderr) = self.drain_output(pgid, stdout_handle, stderr_handle)?;

        Ok(Captured {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code: exit_code_of(status),
        })
    }

    /// Wait for the child, terminating it if cancellation is requested.
    fn wait_for_exit(&self, child: &mut Child, cmd_display: &str) -> Result<ExitStatus, RunFailure> {
        loop {
            if self.is_cancelled() {
                warn!(pid = child.id(), "cancellation requested, terminating script");
                self.terminate_child(child);
                return Err(ExecutorError::Cancelled.into());
            }

            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => std::thread::sleep(WAIT_POLL_INTERVAL),
                Err(e) => {
                    self.terminate_child(child);
                    return Err(RunFailure::Launch(format!(
                        "Error waiting for command [{}]: {}",
                        cmd_display, e
                    )));
                }
            }
        }
    }

    /// Collect the script's output once its main process has exited.
    ///
    /// Background processes left in the script's group keep the pipes open.
    /// They get the termination grace period before the group is killed.
    fn drain_output(
        &self,
        pgid: u32,
        stdout: JoinHandle<Vec<u8>>,
        stderr: JoinHandle<Vec<u8>>,
    ) -> Result<(String, String), RunFailure> {
        let grace = Duration::from_secs(self.settings.termination_grace_seconds);
        let start = Instant::now();
        while !(stdout.is_finished() && stderr.is_finished()) {
            if self.is_cancelled() {
                warn!(pgid, "cancellation requested, killing leftover script processes");
                kill_group(pgid);
                let _ = collect(stdout);
                let _ = collect(stderr);
                return Err(ExecutorError::Cancelled.into());
            }
            if start.elapsed() >= grace {
                warn!(pgid, "script left processes holding its output open, killing them");
                kill_group(pgid);
                break;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
        Ok((collect(stdout), collect(stderr)))
    }

    /// Terminate a child process gracefully then forcefully.
    fn terminate_child(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(child.id() as i32);
            let _ = signal::killpg(pgid, Signal::SIGTERM);

            let grace = Duration::from_secs(self.settings.termination_grace_seconds);
            let start = Instant::now();
            while start.elapsed() < grace {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) => std::thread::sleep(WAIT_POLL_INTERVAL),
                    Err(_) => break,
                }
            }
        }
        // Leftover group members would keep the output pipes open.
        kill_group(child.id());

        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Preconditions stay errors; any other failure to find the working
/// directory is reported like a failed launch.
fn launchable_workdir(resolved: ExecutorResult<PathBuf>) -> ExecutorResult<Result<PathBuf, RunFailure>> {
    match resolved {
        Ok(dir) => Ok(Ok(dir)),
        Err(err) if err.is_precondition() => Err(err),
        Err(err) => Ok(Err(RunFailure::Launch(format!(
            "Error resolving working directory: {}",
            err
        )))),
    }
}

/// Counts a running script for as long as it is held.
struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// SIGKILL every process in the group led by `pgid`.
fn kill_group(pgid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let _ = signal::killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Workspace names are a single relative path component.
fn validate_workspace_name(name: &str) -> ExecutorResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(ExecutorError::InvalidWorkspace(name.to_string()));
    }
    Ok(())
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Exit code of a finished process; signal deaths map to `128 + signo`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_test_executor(temp_dir: &TempDir) -> ScriptExecutor {
        ScriptExecutor::new(ExecutorSettings {
            workspace_root: Some(temp_dir.path().to_path_buf()),
            interpreter: PathBuf::from("/bin/sh"),
            termination_grace_seconds: 1,
        })
    }

    #[test]
    fn test_captures_trimmed_stdout() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        let result = executor
            .execute("test.sh", "echo '  hello world  '\necho", None, &[])
            .unwrap();

        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.stdout(), "hello world");
        assert_eq!(result.stderr(), "");
        assert!(result.success());
        assert!(result.finished_at() >= result.started_at());
    }

    #[test]
    fn test_nonzero_exit_is_data() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        let result = executor
            .execute("fail.sh", "echo oops >&2\nexit 3", None, &[])
            .unwrap();

        assert_eq!(result.exit_code(), 3);
        assert_eq!(result.stderr(), "oops");
        assert!(!result.success());
    }

    #[test]
    fn test_env_and_workspace_exported() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        let result = executor
            .execute(
                "env.sh",
                "echo \"$BUILD_ID:$WORKSPACE\"\npwd",
                Some("ws1"),
                &[("BUILD_ID", "b1")],
            )
            .unwrap();

        let expected_dir = temp_dir.path().join("workspaces").join("ws1");
        let mut lines = result.stdout().lines();
        assert_eq!(lines.next().unwrap(), format!("b1:{}", expected_dir.display()));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(pwd.canonicalize().unwrap(), expected_dir.canonicalize().unwrap());
    }

    #[test]
    fn test_inherited_environment_kept() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        let result = executor
            .execute("path.sh", "test -n \"$PATH\" && echo has-path", None, &[])
            .unwrap();

        assert_eq!(result.stdout(), "has-path");
    }

    #[test]
    fn test_workspace_override_of_env_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        let result = executor
            .execute("ws.sh", "echo $WORKSPACE", Some("ws2"), &[("WORKSPACE", "/elsewhere")])
            .unwrap();

        let expected_dir = temp_dir.path().join("workspaces").join("ws2");
        assert_eq!(result.stdout(), expected_dir.display().to_string());
    }

    #[test]
    fn test_missing_interpreter_reports_launch_failure() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ScriptExecutor::new(ExecutorSettings {
            workspace_root: Some(temp_dir.path().to_path_buf()),
            interpreter: PathBuf::from("/nonexistent/interpreter"),
            termination_grace_seconds: 1,
        });

        let result = executor.execute("test.sh", "echo hi", None, &[]).unwrap();

        assert_eq!(result.exit_code(), LAUNCH_FAILURE_EXIT_CODE);
        assert_eq!(result.stdout(), "");
        assert!(result.stderr().contains("Error running command"));
    }

    #[test]
    fn test_workspace_without_root_is_precondition() {
        let executor = ScriptExecutor::new(ExecutorSettings::default());

        let err = executor.execute("test.sh", "true", Some("ws"), &[]).unwrap_err();

        assert!(matches!(err, ExecutorError::NoWorkspaceRoot(ref ws) if ws == "ws"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_workspace_escape_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        for name in ["", "..", "a/b", "../etc"] {
            let err = executor.execute("test.sh", "true", Some(name), &[]).unwrap_err();
            assert!(matches!(err, ExecutorError::InvalidWorkspace(_)), "accepted {:?}", name);
        }
    }

    #[test]
    fn test_cancellation_flag_shared() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);
        let flag = executor.cancellation_flag();

        assert!(!flag.load(Ordering::SeqCst));
        executor.request_cancel();
        assert!(flag.load(Ordering::SeqCst));

        let err = executor.execute("test.sh", "true", None, &[]).unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));

        executor.clear_cancel();
        assert!(executor.execute("test.sh", "true", None, &[]).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_terminates_running_script() {
        let temp_dir = TempDir::new().unwrap();
        let executor = Arc::new(make_test_executor(&temp_dir));

        let canceller = Arc::clone(&executor);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            canceller.request_cancel();
        });

        let start = Instant::now();
        let err = executor.execute("sleep.sh", "sleep 30", None, &[]).unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, ExecutorError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_reaches_background_process() {
        let temp_dir = TempDir::new().unwrap();
        let executor = Arc::new(ScriptExecutor::new(ExecutorSettings {
            workspace_root: Some(temp_dir.path().to_path_buf()),
            interpreter: PathBuf::from("/bin/sh"),
            termination_grace_seconds: 30,
        }));

        let canceller = Arc::clone(&executor);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            canceller.request_cancel();
        });

        // The main process exits at once; the sleeper holds the pipes.
        let start = Instant::now();
        let err = executor
            .execute("bg.sh", "sleep 30 &\necho started", None, &[])
            .unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, ExecutorError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!executor.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_leftover_background_process_killed_after_grace() {
        let temp_dir = TempDir::new().unwrap();
        let executor = make_test_executor(&temp_dir);

        let start = Instant::now();
        let result = executor
            .execute("bg.sh", "sleep 30 &\necho started", None, &[])
            .unwrap();

        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.stdout(), "started");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_running_flag_tracks_script() {
        let temp_dir = TempDir::new().unwrap();
        let executor = Arc::new(make_test_executor(&temp_dir));

        let runner = Arc::clone(&executor);
        let handle = std::thread::spawn(move || runner.execute("nap.sh", "sleep 1", None, &[]));
        std::thread::sleep(Duration::from_millis(300));
        assert!(executor.is_running());

        handle.join().unwrap().unwrap();
        assert!(!executor.is_running());
    }

    #[test]
    fn test_unresolvable_workdir_is_launch_failure() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "cwd removed");
        let outcome = launchable_workdir(Err(ExecutorError::Io(missing))).unwrap();
        match outcome {
            Err(RunFailure::Launch(message)) => {
                assert!(message.contains("Error resolving working directory"));
                assert!(message.contains("cwd removed"));
            }
            _ => panic!("expected a launch failure"),
        }

        let err = launchable_workdir(Err(ExecutorError::NoWorkspaceRoot("ws".to_string()))).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_exit_code_of_signal() {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            // raw wait status for "killed by SIGKILL"
            assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
            assert_eq!(exit_code_of(ExitStatus::from_raw(2 << 8)), 2);
        }
    }
}
