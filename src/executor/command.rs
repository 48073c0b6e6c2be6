// Shell command execution: the run_command tool

use crate::executor::capture::{Captured, capture_lines};
use crate::executor::config::ExecutorConfig;
use crate::executor::process::ProcessGuard;
use crate::executor::sandbox::resolve_within;
use crate::executor::supervisor::{Completion, TimeoutSupervisor};
use crate::executor::types::{CommandFailure, CommandRequest, ExecutionResult, ToolDefinition};
use crate::executor::{ExecutorError, Result, ToolImpl, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TOOL_NAME: &str = "run_command";

/// Spawns shell commands confined to the base directory
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    base_dir: PathBuf,
    shell: String,
    kill_grace: Duration,
    max_lines: usize,
}

impl CommandExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            shell: config.shell.clone(),
            kill_grace: config.kill_grace,
            max_lines: config.max_lines,
        }
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Resolve the working directory for `cwd`, rejecting escapes
    pub fn working_dir(&self, cwd: Option<&str>) -> Result<PathBuf> {
        match cwd {
            Some(cwd) if !cwd.is_empty() => resolve_within(&self.base_dir, cwd),
            _ => Ok(self.base_dir.clone()),
        }
    }

    /// Run one command to completion or timeout.
    ///
    /// Every exit path, including dropping the returned future, leaves no
    /// member of the command's process group running.
    pub async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult> {
        if request.command.trim().is_empty() {
            return Err(ExecutorError::InvalidArgument(
                "command",
                "must not be empty".to_string(),
            ));
        }
        let working_dir = self.working_dir(request.cwd.as_deref())?;
        let supervisor = TimeoutSupervisor::new(request.timeout, self.kill_grace);
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&working_dir)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(TOOL_NAME.to_string(), e.to_string()))?;
        let mut guard = ProcessGuard::new(child);
        let group = guard.group();

        info!(
            pid = group.id(),
            cwd = %working_dir.display(),
            timeout_ms = supervisor.timeout().map(|t| t.as_millis() as u64),
            "spawned command"
        );

        let child = guard.child_mut();
        let stdin_task = match (child.stdin.take(), request.stdin) {
            (Some(mut pipe), Some(input)) => Some(tokio::spawn(async move {
                // Closing the pipe delivers EOF
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "stdin write stopped early");
                }
                drop(pipe);
            })),
            _ => None,
        };

        let stdout = child.stdout.take().ok_or_else(|| {
            ExecutorError::OutputCaptureFailed(TOOL_NAME.to_string(), "stdout not piped".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ExecutorError::OutputCaptureFailed(TOOL_NAME.to_string(), "stderr not piped".into())
        })?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let stdout_task = tokio::spawn(capture_lines(stdout, self.max_lines, cancel_rx.clone()));
        let stderr_task = tokio::spawn(capture_lines(stderr, self.max_lines, cancel_rx));

        let completion = supervisor.supervise(guard.child_mut(), &group).await;

        // Background descendants must not outlive the call
        group.kill();

        let streams = self
            .collect_streams(stdout_task, stderr_task, &cancel_tx)
            .await;
        if let Some(task) = stdin_task {
            task.abort();
        }
        drop(guard);

        let completion = completion
            .map_err(|e| ExecutorError::Internal(format!("waiting for command: {e}")))?;
        let (stdout, stderr) = streams?;

        let (exit_code, timed_out) = match completion {
            Completion::Exited(status) => (exit_code_of(status), false),
            Completion::TimedOut => (None, true),
        };

        let result = ExecutionResult {
            truncated: stdout.truncated || stderr.truncated,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            stdout: stdout.text,
            stderr: stderr.text,
            exit_code,
            cwd: working_dir,
            command: request.command,
            timeout_seconds: supervisor.timeout().map(|t| t.as_secs_f64()),
            timed_out,
            max_lines: self.max_lines,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            command = %result.command.chars().take(100).collect::<String>(),
            duration_ms = result.duration_ms,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            truncated = result.truncated,
            "command finished"
        );

        Ok(result)
    }

    /// Wait for both capturers, cancelling them after the grace period.
    ///
    /// Pipes normally close once the group is gone; a descendant that left
    /// the group can hold them open indefinitely.
    async fn collect_streams(
        &self,
        stdout_task: JoinHandle<std::io::Result<Captured>>,
        stderr_task: JoinHandle<std::io::Result<Captured>>,
        cancel: &watch::Sender<bool>,
    ) -> Result<(Captured, Captured)> {
        let streams = async { tokio::join!(stdout_task, stderr_task) };
        tokio::pin!(streams);

        let (stdout, stderr) = tokio::select! {
            joined = &mut streams => joined,
            _ = tokio::time::sleep(self.kill_grace) => {
                warn!("output streams still open after process exit, cancelling capture");
                let _ = cancel.send(true);
                streams.await
            }
        };

        Ok((join_capture(stdout)?, join_capture(stderr)?))
    }
}

fn join_capture(
    joined: std::result::Result<std::io::Result<Captured>, tokio::task::JoinError>,
) -> Result<Captured> {
    joined
        .map_err(|e| ExecutorError::Internal(format!("capture task failed: {e}")))?
        .map_err(|e| ExecutorError::OutputCaptureFailed(TOOL_NAME.to_string(), e.to_string()))
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    // Negative signal number for signal deaths, so `exit 137` stays distinct
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

/// Effective timeout from the seconds and milliseconds arguments.
///
/// `timeout_ms` wins when both are present. Neither present means
/// `default`; a value <= 0 disables the timeout.
pub fn effective_timeout(
    timeout: Option<&Value>,
    timeout_ms: Option<&Value>,
    default: Duration,
) -> Result<Option<Duration>> {
    let seconds = match (timeout_ms, timeout) {
        (Some(ms), _) => number_arg("timeout_ms", ms)? / 1000.0,
        (None, Some(secs)) => number_arg("timeout", secs)?,
        (None, None) => return Ok(Some(default).filter(|d| !d.is_zero())),
    };

    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|e| ExecutorError::InvalidArgument("timeout", e.to_string()))
    } else {
        Ok(None)
    }
}

fn number_arg(name: &'static str, value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| n.is_finite())
        .ok_or_else(|| ExecutorError::InvalidArgument(name, format!("not a number: {value}")))
}

/// run_command tool input parameters
#[derive(Debug, Deserialize)]
struct RunCommandInput {
    command: String,
    #[serde(default)]
    stdin: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<Value>,
}

/// run_command tool implementation
pub struct RunCommandTool {
    description: String,
    executor: CommandExecutor,
    default_timeout: Duration,
}

impl RunCommandTool {
    pub fn new(description: impl Into<String>, config: &ExecutorConfig) -> Self {
        Self {
            description: description.into(),
            executor: CommandExecutor::new(config),
            default_timeout: config.default_timeout,
        }
    }

    fn failure(
        &self,
        error: &ExecutorError,
        command: String,
        cwd: Option<PathBuf>,
    ) -> Result<ToolOutput> {
        let failure = CommandFailure {
            error: format!("Error running command: {error}"),
            command,
            cwd,
            truncated: false,
            stdout_truncated: false,
            stderr_truncated: false,
            max_lines: self.executor.max_lines(),
        };
        ToolOutput::json(&failure, true)
    }
}

#[async_trait]
impl ToolImpl for RunCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: self.description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute (e.g. 'ls -al', 'echo \"hello\"')"
                    },
                    "stdin": {
                        "type": "string",
                        "description": "Optional text passed to the command on STDIN, followed by EOF"
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Optional subdirectory (relative to the base directory) to run in"
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Optional timeout in seconds; <= 0 disables it. Defaults to 60"
                    },
                    "timeout_ms": {
                        "type": "number",
                        "description": "Optional timeout in milliseconds; overrides `timeout`"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn run(&self, input: Value) -> Result<ToolOutput> {
        let raw_command = input
            .get("command")
            .map(|c| c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string()))
            .unwrap_or_default();
        let input: RunCommandInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => {
                let error = ExecutorError::InvalidInput(TOOL_NAME.to_string(), e.to_string());
                return self.failure(&error, raw_command, None);
            }
        };

        debug!(command = %input.command, cwd = ?input.cwd, "executing run_command");

        let cwd = match self.executor.working_dir(input.cwd.as_deref()) {
            Ok(dir) => dir,
            Err(e) => return self.failure(&e, input.command, None),
        };

        let timeout = match effective_timeout(
            input.timeout.as_ref(),
            input.timeout_ms.as_ref(),
            self.default_timeout,
        ) {
            Ok(t) => t,
            Err(e) => return self.failure(&e, input.command, Some(cwd)),
        };

        let mut request = CommandRequest::new(input.command.clone()).with_timeout(timeout);
        request.stdin = input.stdin;
        request.cwd = input.cwd;

        match self.executor.execute(request).await {
            Ok(result) => ToolOutput::json(&result, false),
            Err(e) => {
                warn!(error = %e, "run_command failed");
                self.failure(&e, input.command, Some(cwd))
            }
        }
    }
}

/// Default run_command tool description
pub fn default_run_command_description() -> String {
    r#"Run a shell command and return stdout and stderr as JSON.
Commands run through the POSIX shell, so pipes and redirection work.
The working directory is confined to the base directory.
Each stream keeps at most `max_lines` lines; the rest is discarded.
On timeout the whole process group is killed and `timed_out` is true."#
        .to_string()
}
