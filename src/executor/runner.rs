// Main Executor implementation

use crate::executor::command::{RunCommandTool, default_run_command_description};
use crate::executor::config::ExecutorConfig;
use crate::executor::error::{ExecutorError, Result};
use crate::executor::files::{
    DeleteFileTool, ListFilesTool, ReadFileTool, WriteFileTool, default_delete_file_description,
    default_list_files_description, default_read_file_description, default_write_file_description,
};
use crate::executor::tool::ToolImpl;
use crate::executor::types::{ToolDefinition, ToolOutput};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reserved tool name that returns the tool catalog
pub const LIST_TOOLS: &str = "list_tools";

/// Main executor for tool execution
pub struct Executor {
    tools: HashMap<String, Arc<dyn ToolImpl>>,
}

impl Executor {
    /// Create a new Executor instance
    pub fn new(config: ExecutorConfig) -> Self {
        Self::init(config)
    }

    /// Initialize with registered tools
    pub fn init(config: ExecutorConfig) -> Self {
        debug!(
            base_dir = %config.base_dir.display(),
            shell = %config.shell,
            default_timeout_secs = config.default_timeout.as_secs(),
            max_lines = config.max_lines,
            "initializing executor"
        );

        // Load tool descriptions from config file
        let descriptions = match crate::executor::tool::load_tool_descriptions(&config.tools_toml_path) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %config.tools_toml_path.display(), error = %e, "ignoring tools.toml");
                HashMap::new()
            }
        };
        let describe = |name: &str, default: fn() -> String| {
            descriptions.get(name).cloned().unwrap_or_else(default)
        };

        let base_dir = config.base_dir.clone();
        let registered: Vec<Arc<dyn ToolImpl>> = vec![
            Arc::new(ListFilesTool::new(
                base_dir.clone(),
                describe("list_files", default_list_files_description),
            )),
            Arc::new(ReadFileTool::new(
                base_dir.clone(),
                describe("read_file", default_read_file_description),
            )),
            Arc::new(WriteFileTool::new(
                base_dir.clone(),
                describe("write_file", default_write_file_description),
            )),
            Arc::new(DeleteFileTool::new(
                base_dir,
                describe("delete_file", default_delete_file_description),
            )),
            Arc::new(RunCommandTool::new(
                describe("run_command", default_run_command_description),
                &config,
            )),
        ];

        let tools: HashMap<String, Arc<dyn ToolImpl>> = registered
            .into_iter()
            .map(|tool| (tool.name(), tool))
            .collect();

        info!(tool_count = tools.len(), "executor initialized with tools");

        Self { tools }
    }

    /// Get all tool definitions, sorted by name
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name with JSON input
    pub async fn execute(&self, tool_name: &str, input: serde_json::Value) -> Result<ToolOutput> {
        if tool_name == LIST_TOOLS {
            return ToolOutput::json(&self.tool_definitions(), false);
        }

        debug!(tool_name = %tool_name, "looking up tool");

        let tool = self
            .tools
            .get(tool_name)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownTool(tool_name.to_string()))?;

        info!(tool_name = %tool_name, "executing tool");
        tool.run(input).await
    }

    /// Execute a tool, folding every error into an error output
    pub async fn call(&self, tool_name: &str, input: serde_json::Value) -> ToolOutput {
        match self.execute(tool_name, input).await {
            Ok(output) => output,
            Err(e) => {
                if e.is_rejection() {
                    warn!(tool_name = %tool_name, error = %e, "tool call rejected");
                } else {
                    warn!(tool_name = %tool_name, error = %e, "tool call failed");
                }
                ToolOutput::error(format!("Error: {e}"))
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::init(ExecutorConfig::default())
    }
}
