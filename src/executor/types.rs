// Data types for Executor module

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tool definition advertised to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Output from a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text result of the tool (JSON document for structured tools)
    pub content: String,
    /// Whether the invocation failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Pretty-printed JSON output
    pub fn json(value: &impl Serialize, is_error: bool) -> crate::executor::Result<Self> {
        Ok(Self {
            content: serde_json::to_string_pretty(value)?,
            is_error,
        })
    }
}

/// A single shell command invocation, validated and ready to run
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Shell command line, passed to `<shell> -c`
    pub command: String,
    /// Text delivered on STDIN, followed by EOF
    pub stdin: Option<String>,
    /// Working directory relative to the base directory
    pub cwd: Option<String>,
    /// Effective timeout; `None` waits for natural completion
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
            cwd: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Structured completion status of `run_command`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was forcibly terminated
    pub exit_code: Option<i32>,
    pub cwd: PathBuf,
    pub command: String,
    /// Effective timeout in seconds, `None` when disabled
    pub timeout_seconds: Option<f64>,
    pub timed_out: bool,
    pub truncated: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub max_lines: usize,
    pub duration_ms: u64,
}

/// Structured error result of `run_command`; no process is left behind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandFailure {
    pub error: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub truncated: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub max_lines: usize,
}

/// Kind of directory entry reported by `list_files`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Directory entry reported by `list_files`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes, `None` for directories
    pub size: Option<u64>,
}
