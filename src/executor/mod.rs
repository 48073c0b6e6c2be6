// Executor module - tool registry, file tools and shell command execution

pub mod capture;
pub mod command;
pub mod config;
pub mod error;
pub mod files;
pub mod process;
pub mod runner;
pub mod sandbox;
pub mod supervisor;
pub mod tool;
pub mod types;

pub use command::CommandExecutor;
pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};
pub use runner::{Executor, LIST_TOOLS};
pub use tool::ToolImpl;
pub use types::{CommandRequest, ExecutionResult, ToolDefinition, ToolOutput};
