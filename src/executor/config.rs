// Executor configuration and output cap resolution

use crate::env::{env_string, parse_env_var};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Built-in per-stream line cap
pub const DEFAULT_MAX_LINES: usize = 1000;

/// Environment overrides for the line cap, in priority order
pub const MAX_LINES_ENV_VARS: [&str; 2] = ["RUN_COMMAND_MAX_LINES", "MAX_OUTPUT_LINES"];

/// Environment override for the JSON config file location
pub const CONFIG_PATH_ENV_VAR: &str = "FILE_SERVER_CONFIG_PATH";

/// Config file looked up next to the server executable
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Root directory all paths and working directories are confined to
    pub base_dir: PathBuf,
    /// Path to tools.toml configuration file
    pub tools_toml_path: PathBuf,
    /// Shell path for command execution
    pub shell: String,
    /// Timeout applied when a call supplies none
    pub default_timeout: Duration,
    /// Time between SIGTERM and SIGKILL when terminating a process group
    pub kill_grace: Duration,
    /// Per-stream output line cap
    pub max_lines: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/data"),
            tools_toml_path: PathBuf::from("tools.toml"),
            shell: String::from("/bin/sh"),
            default_timeout: Duration::from_secs(60),
            kill_grace: Duration::from_millis(2000),
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

impl ExecutorConfig {
    /// Load from environment variables; the line cap is resolved once here
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = ExecutorConfig::default();

        let base_dir = env_string("FILE_SERVER_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_dir);
        let tools_toml_path = env_string("FILE_SERVER_TOOLS_TOML")
            .map(PathBuf::from)
            .unwrap_or(defaults.tools_toml_path);
        let shell = env_string("FILE_SERVER_SHELL").unwrap_or(defaults.shell);
        let default_timeout = Duration::from_secs(parse_env_var(
            "RUN_COMMAND_DEFAULT_TIMEOUT_SECS",
            defaults.default_timeout.as_secs(),
        ));
        let kill_grace = Duration::from_millis(parse_env_var(
            "RUN_COMMAND_KILL_GRACE_MS",
            defaults.kill_grace.as_millis() as u64,
        ));

        Self {
            base_dir,
            tools_toml_path,
            shell,
            default_timeout,
            kill_grace,
            max_lines: resolve_max_lines(),
        }
    }
}

/// Resolve the per-stream line cap from the process environment and config file.
pub fn resolve_max_lines() -> usize {
    resolve_max_lines_with(|name| std::env::var(name).ok(), &default_config_path())
}

/// `config.json` beside the running executable
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Resolve the line cap with an explicit variable lookup.
///
/// Sources are tried in order: each of [`MAX_LINES_ENV_VARS`], then the JSON
/// file (`run_command.max_lines`, then top-level `max_lines`), then
/// [`DEFAULT_MAX_LINES`]. A missing, non-positive or unparsable value in one
/// source falls through to the next; file errors never propagate.
pub fn resolve_max_lines_with<F>(lookup: F, default_config_path: &Path) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    for name in MAX_LINES_ENV_VARS {
        let Some(raw) = lookup(name) else { continue };
        if raw.trim().is_empty() {
            continue;
        }
        match parse_positive(&raw) {
            Some(n) => {
                debug!(var = name, max_lines = n, "max_lines from environment");
                return n;
            }
            None => warn!(var = name, value = %raw, "Ignoring invalid max_lines override"),
        }
    }

    let config_path = lookup(CONFIG_PATH_ENV_VAR)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path.to_path_buf());

    if let Some(n) = max_lines_from_file(&config_path) {
        debug!(path = %config_path.display(), max_lines = n, "max_lines from config file");
        return n;
    }

    DEFAULT_MAX_LINES
}

fn max_lines_from_file(path: &Path) -> Option<usize> {
    if !path.is_file() {
        return None;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read config file");
            return None;
        }
    };

    let config: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse config file");
            return None;
        }
    };

    config
        .get("run_command")
        .and_then(|rc| rc.get("max_lines"))
        .and_then(positive_from_json)
        .or_else(|| config.get("max_lines").and_then(positive_from_json))
}

fn positive_from_json(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().filter(|n| *n > 0).map(|n| n as usize),
        Value::String(s) => parse_positive(s),
        _ => None,
    }
}

fn parse_positive(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
