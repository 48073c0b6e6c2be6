// Tool trait and description overrides

use crate::executor::types::ToolDefinition;
use crate::executor::{Result, ToolOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Internal trait for tool implementations
#[async_trait]
pub trait ToolImpl: Send + Sync {
    /// Get the tool definition (name, description, input_schema)
    fn definition(&self) -> ToolDefinition;

    /// Run the tool with JSON input
    async fn run(&self, input: serde_json::Value) -> Result<ToolOutput>;

    /// Get tool name
    fn name(&self) -> String {
        self.definition().name
    }
}

/// Load tool descriptions from TOML config file
///
/// Each table may carry a `description` string:
///
/// ```toml
/// [run_command]
/// description = "Run a command in the project sandbox"
/// ```
pub fn load_tool_descriptions(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "tools.toml not found, using default descriptions");
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path)?;
    let config: toml::Table = content.parse()?;

    let descriptions: HashMap<String, String> = config
        .iter()
        .filter_map(|(name, value)| {
            value
                .get("description")
                .and_then(|d| d.as_str())
                .map(|d| (name.clone(), d.to_string()))
        })
        .collect();

    debug!(path = %path.display(), tool_count = descriptions.len(), "loaded tool descriptions from config");
    Ok(descriptions)
}
