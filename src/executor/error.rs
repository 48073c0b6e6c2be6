// Error types for Executor module

use thiserror::Error;

/// Executor error types
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid input for tool '{0}': {1}")]
    InvalidInput(String, String),

    #[error("Invalid argument '{0}': {1}")]
    InvalidArgument(&'static str, String),

    #[error("Cannot access '{0}' outside of the base directory")]
    PathEscape(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn process for tool '{0}': {1}")]
    SpawnFailed(String, String),

    #[error("Failed to capture output for tool '{0}': {1}")]
    OutputCaptureFailed(String, String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl ExecutorError {
    /// Errors raised before any process was spawned or any file was touched
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ExecutorError::InvalidInput(..)
                | ExecutorError::InvalidArgument(..)
                | ExecutorError::PathEscape(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
