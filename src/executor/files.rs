// File tools: list, read, write and delete under the base directory

use crate::executor::sandbox::resolve_within;
use crate::executor::types::{EntryKind, FileEntry, ToolDefinition};
use crate::executor::{ExecutorError, Result, ToolImpl, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn parse_input<T: DeserializeOwned>(tool: &str, input: serde_json::Value) -> Result<T> {
    serde_json::from_value(input)
        .map_err(|e| ExecutorError::InvalidInput(tool.to_string(), e.to_string()))
}

/// Map a missing path onto `NotFound`, keeping other IO errors
fn not_found(relative: &str) -> impl Fn(std::io::Error) -> ExecutorError + '_ {
    move |e| match e.kind() {
        ErrorKind::NotFound => ExecutorError::NotFound(relative.to_string()),
        _ => ExecutorError::Io(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListInput {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct PathInput {
    #[serde(alias = "path")]
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct WriteInput {
    #[serde(alias = "path")]
    file_path: String,
    content: String,
}

/// List entries of a directory under the base directory
pub async fn list_files(base_dir: &Path, relative: &str) -> Result<Vec<FileEntry>> {
    let dir = resolve_within(base_dir, relative)?;
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(not_found(relative))?;

    while let Some(entry) = read_dir.next_entry().await? {
        // Follows symlinks, like `ls -L`; a dangling link is listed as itself
        let metadata = match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(
                    path = %entry.path().display(),
                    error = %e,
                    "cannot follow entry, using link metadata"
                );
                entry.metadata().await?
            }
        };
        let (kind, size) = if metadata.is_dir() {
            (EntryKind::Directory, None)
        } else {
            (EntryKind::File, Some(metadata.len()))
        };
        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
            size,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(dir = %dir.display(), count = entries.len(), "listed directory");
    Ok(entries)
}

/// Read a text file under the base directory
pub async fn read_file(base_dir: &Path, relative: &str) -> Result<String> {
    let path = resolve_within(base_dir, relative)?;
    if !tokio::fs::metadata(&path)
        .await
        .map_err(not_found(relative))?
        .is_file()
    {
        return Err(ExecutorError::NotFound(relative.to_string()));
    }
    Ok(tokio::fs::read_to_string(&path).await?)
}

/// Write a file, creating parent directories; returns the written path
pub async fn write_file(base_dir: &Path, relative: &str, content: &str) -> Result<PathBuf> {
    let path = resolve_within(base_dir, relative)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, content.as_bytes()).await?;
    info!(path = %path.display(), bytes = content.len(), "wrote file");
    Ok(path)
}

/// Delete a file or an empty directory; returns what was removed
pub async fn delete_file(base_dir: &Path, relative: &str) -> Result<EntryKind> {
    let path = resolve_within(base_dir, relative)?;
    let metadata = tokio::fs::symlink_metadata(&path)
        .await
        .map_err(not_found(relative))?;

    let kind = if metadata.is_dir() {
        tokio::fs::remove_dir(&path).await?;
        EntryKind::Directory
    } else {
        tokio::fs::remove_file(&path).await?;
        EntryKind::File
    };
    info!(path = %path.display(), kind = ?kind, "deleted");
    Ok(kind)
}

/// list_files tool
pub struct ListFilesTool {
    base_dir: PathBuf,
    description: String,
}

impl ListFilesTool {
    pub fn new(base_dir: PathBuf, description: impl Into<String>) -> Self {
        Self {
            base_dir,
            description: description.into(),
        }
    }
}

#[async_trait]
impl ToolImpl for ListFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_files".to_string(),
            description: self.description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Optional subdirectory relative to the base directory"
                    }
                }
            }),
        }
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolOutput> {
        // A bare call with no arguments lists the base directory
        let input = if input.is_null() {
            serde_json::json!({})
        } else {
            input
        };
        let ListInput { path } = parse_input("list_files", input)?;
        let entries = list_files(&self.base_dir, &path).await?;
        ToolOutput::json(&entries, false)
    }
}

/// read_file tool
pub struct ReadFileTool {
    base_dir: PathBuf,
    description: String,
}

impl ReadFileTool {
    pub fn new(base_dir: PathBuf, description: impl Into<String>) -> Self {
        Self {
            base_dir,
            description: description.into(),
        }
    }
}

#[async_trait]
impl ToolImpl for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: self.description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file relative to the base directory"
                    }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let PathInput { file_path } = parse_input("read_file", input)?;
        let content = read_file(&self.base_dir, &file_path).await?;
        Ok(ToolOutput::success(content))
    }
}

/// write_file tool
pub struct WriteFileTool {
    base_dir: PathBuf,
    description: String,
}

impl WriteFileTool {
    pub fn new(base_dir: PathBuf, description: impl Into<String>) -> Self {
        Self {
            base_dir,
            description: description.into(),
        }
    }
}

#[async_trait]
impl ToolImpl for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: self.description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file relative to the base directory"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file"
                    }
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let WriteInput { file_path, content } = parse_input("write_file", input)?;
        write_file(&self.base_dir, &file_path, &content).await?;
        Ok(ToolOutput::success(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            file_path
        )))
    }
}

/// delete_file tool
pub struct DeleteFileTool {
    base_dir: PathBuf,
    description: String,
}

impl DeleteFileTool {
    pub fn new(base_dir: PathBuf, description: impl Into<String>) -> Self {
        Self {
            base_dir,
            description: description.into(),
        }
    }
}

#[async_trait]
impl ToolImpl for DeleteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_file".to_string(),
            description: self.description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file or empty directory relative to the base directory"
                    }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let PathInput { file_path } = parse_input("delete_file", input)?;
        let message = match delete_file(&self.base_dir, &file_path).await? {
            EntryKind::Directory => format!("Successfully deleted directory: {file_path}"),
            EntryKind::File => format!("Successfully deleted file: {file_path}"),
        };
        Ok(ToolOutput::success(message))
    }
}

pub fn default_list_files_description() -> String {
    "List files in a directory under the base directory as JSON (name, type, size).".to_string()
}

pub fn default_read_file_description() -> String {
    "Read the contents of a text file under the base directory.".to_string()
}

pub fn default_write_file_description() -> String {
    "Write content to a file under the base directory, creating parent directories.".to_string()
}

pub fn default_delete_file_description() -> String {
    "Delete a file or an empty directory under the base directory.".to_string()
}
