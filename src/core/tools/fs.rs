//! Filesystem tools.
//!
//! Every path argument is resolved through the sandbox before any I/O.

use std::sync::Arc;

use async_trait::async_trait;
use similar::{ChangeTag, TextDiff};

use super::{Sandbox, required_str};
use crate::core::agent::{AgentError, Result, ToolHandler, ToolSpec};

/// Read file contents, optionally a line range.
pub struct ReadFile {
    sandbox: Arc<Sandbox>,
}

impl ReadFile {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for ReadFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read file contents; optional 1-based line range.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to read" },
                    "start_line": { "type": "integer" },
                    "end_line": { "type": "integer" }
                },
                "required": ["path"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {e}", path.display())))?;

        let start_line = args.get("start_line").and_then(serde_json::Value::as_u64);
        let end_line = args.get("end_line").and_then(serde_json::Value::as_u64);

        if start_line.is_none() && end_line.is_none() {
            return Ok(content);
        }

        let lines: Vec<&str> = content.lines().collect();
        let start = start_line.map_or(0, |s| (s.max(1) - 1) as usize);
        let end = end_line
            .map_or(lines.len(), |e| (e as usize).min(lines.len()))
            .max(start);

        if start >= lines.len() {
            return Ok(String::new());
        }

        Ok(lines[start..end].join("\n"))
    }
}

/// Create or overwrite a file.
pub struct WriteFile {
    sandbox: Arc<Sandbox>,
}

impl WriteFile {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for WriteFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Create or overwrite a file; parent directories are created.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to write" },
                    "content": { "type": "string", "description": "Content to write" },
                    "append": { "type": "boolean", "description": "Append instead of overwriting" }
                },
                "required": ["path", "content"]
            }),
            destructive: true,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;
        let content = required_str(args, "content")?;
        let append = args
            .get("append")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
            file.flush()
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        } else {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        }

        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path.display()
        ))
    }
}

/// Replace text inside a file, anchored on an exact match.
pub struct EditFile {
    sandbox: Arc<Sandbox>,
}

impl EditFile {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for EditFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file".to_string(),
            description:
                "Edit a file by replacing a specific string with new content. The old_string must match exactly (including whitespace)."
                    .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to edit" },
                    "old_string": { "type": "string", "description": "The exact text to find and replace" },
                    "new_string": { "type": "string", "description": "The text to replace it with" },
                    "replace_all": { "type": "boolean", "description": "Replace all occurrences (default: false)" }
                },
                "required": ["path", "old_string", "new_string"]
            }),
            destructive: true,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;
        let old_string = required_str(args, "old_string")?;
        let new_string = required_str(args, "new_string")?;
        let replace_all = args
            .get("replace_all")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if old_string == new_string {
            return Err(AgentError::ToolExecution(
                "old_string and new_string must be different".to_string(),
            ));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {e}", path.display())))?;

        // Stale-edit detection: the anchor must still be present, and
        // unambiguous unless replace_all was requested.
        if !content.contains(old_string) {
            return Err(AgentError::EditConflict(format!(
                "old_string not found in {}",
                path.display()
            )));
        }

        if !replace_all {
            let count = content.matches(old_string).count();
            if count > 1 {
                return Err(AgentError::EditConflict(format!(
                    "{count} matches for old_string in {}; use replace_all or add context to make the match unique",
                    path.display()
                )));
            }
        }

        let new_content = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };

        let diff = generate_diff(&content, &new_content);

        tokio::fs::write(&path, &new_content)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        Ok(format!("Edit applied to {}.\n\n{diff}", path.display()))
    }
}

/// Delete a file or directory.
pub struct DeleteFile {
    sandbox: Arc<Sandbox>,
}

impl DeleteFile {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for DeleteFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "delete_file".to_string(),
            description: "Delete a file, or a directory with recursive=true.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to delete" },
                    "recursive": { "type": "boolean", "description": "Required to delete directories" }
                },
                "required": ["path"]
            }),
            destructive: true,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;
        let recursive = args
            .get("recursive")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {e}", path.display())))?;

        if metadata.is_dir() {
            if !recursive {
                return Err(AgentError::ToolExecution(
                    "refusing to delete a directory without recursive=true".to_string(),
                ));
            }
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
            Ok(format!("Deleted directory {}", path.display()))
        } else {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
            Ok(format!("Deleted file {}", path.display()))
        }
    }
}

/// List files and folders in a directory.
pub struct ListDirectory {
    sandbox: Arc<Sandbox>,
}

impl ListDirectory {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for ListDirectory {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_directory".to_string(),
            description: "List files and subdirectories with basic info.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list" },
                    "include_hidden": { "type": "boolean" }
                },
                "required": ["path"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;
        let include_hidden = args
            .get("include_hidden")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {e}", path.display())))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }

            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => dirs.push(format!("{name}/")),
                Ok(meta) => files.push(format!("{name} ({} bytes)", meta.len())),
                Err(_) => files.push(name),
            }
        }

        dirs.sort();
        files.sort();

        let mut output = vec![format!("Directory: {}", path.display())];
        output.extend(dirs);
        output.extend(files);
        Ok(output.join("\n"))
    }
}

/// Create a directory with parents.
pub struct CreateDirectory {
    sandbox: Arc<Sandbox>,
}

impl CreateDirectory {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateDirectory {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_directory".to_string(),
            description: "Create a directory (with parents).".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to create" }
                },
                "required": ["path"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        Ok(format!("Created {}", path.display()))
    }
}

/// Move or rename a file or directory.
pub struct MoveFile {
    sandbox: Arc<Sandbox>,
}

impl MoveFile {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for MoveFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "move_file".to_string(),
            description: "Move or rename a file or directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "destination": { "type": "string" },
                    "overwrite": { "type": "boolean" }
                },
                "required": ["source", "destination"]
            }),
            destructive: true,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let source = self.sandbox.resolve(required_str(args, "source")?)?;
        let destination = self.sandbox.resolve(required_str(args, "destination")?)?;
        let overwrite = args
            .get("overwrite")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if tokio::fs::try_exists(&destination)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?
        {
            if !overwrite {
                return Err(AgentError::ToolExecution(format!(
                    "destination exists: {}",
                    destination.display()
                )));
            }
            remove_any(&destination).await?;
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        }

        tokio::fs::rename(&source, &destination)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        Ok(format!(
            "Moved {} -> {}",
            source.display(),
            destination.display()
        ))
    }
}

/// Copy a file or directory.
pub struct CopyFile {
    sandbox: Arc<Sandbox>,
}

impl CopyFile {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for CopyFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "copy_file".to_string(),
            description: "Copy a file, or a directory with recursive=true.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "destination": { "type": "string" },
                    "recursive": { "type": "boolean" },
                    "overwrite": { "type": "boolean" }
                },
                "required": ["source", "destination"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let source = self.sandbox.resolve(required_str(args, "source")?)?;
        let destination = self.sandbox.resolve(required_str(args, "destination")?)?;
        let recursive = args
            .get("recursive")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let overwrite = args
            .get("overwrite")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if tokio::fs::try_exists(&destination)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?
        {
            if !overwrite {
                return Err(AgentError::ToolExecution(format!(
                    "destination exists: {}",
                    destination.display()
                )));
            }
            remove_any(&destination).await?;
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        }

        let source_meta = tokio::fs::metadata(&source)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {e}", source.display())))?;

        if source_meta.is_dir() {
            if !recursive {
                return Err(AgentError::ToolExecution(
                    "source is a directory; set recursive=true to copy directories".to_string(),
                ));
            }
            copy_dir(source.clone(), destination.clone()).await?;
        } else {
            tokio::fs::copy(&source, &destination)
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        }

        Ok(format!(
            "Copied {} -> {}",
            source.display(),
            destination.display()
        ))
    }
}

/// Metadata about a file or directory.
pub struct FileInfo {
    sandbox: Arc<Sandbox>,
}

impl FileInfo {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for FileInfo {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "file_info".to_string(),
            description: "Get metadata about a file or directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                },
                "required": ["path"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let path = self.sandbox.resolve(required_str(args, "path")?)?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {e}", path.display())))?;

        let kind = if metadata.is_dir() { "directory" } else { "file" };
        let modified = metadata
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Local>::from)
            .map_or_else(
                || "unknown".to_string(),
                |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            );

        Ok(format!(
            "{}: {kind}, {} bytes, modified {modified}",
            path.display(),
            metadata.len()
        ))
    }
}

/// Remove a path regardless of kind.
async fn remove_any(path: &std::path::Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))
    } else {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))
    }
}

/// Recursively copy a directory tree.
///
/// Boxed for recursion in an async fn.
fn copy_dir(
    source: std::path::PathBuf,
    destination: std::path::PathBuf,
) -> futures::future::BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&destination)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        let mut entries = tokio::fs::read_dir(&source)
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?
        {
            let target = destination.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

            if file_type.is_dir() {
                copy_dir(entry.path(), target).await?;
            } else {
                tokio::fs::copy(entry.path(), target)
                    .await
                    .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
            }
        }

        Ok(())
    })
}

/// Unified-diff-style rendering of an edit, for results and confirmation.
fn generate_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push_str(sign);
        output.push_str(change.value());
        if !change.value().ends_with('\n') {
            output.push('\n');
        }
    }

    output
}
