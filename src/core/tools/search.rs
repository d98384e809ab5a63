//! Code and file search tools.
//!
//! All scans walk the sandbox tree with gitignore-aware filtering and return
//! bounded results; truncation is always reported so the model knows the
//! results are partial.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use ignore::WalkBuilder;
use regex::RegexBuilder;

use super::{Sandbox, required_str};
use crate::core::agent::{AgentError, Result, ToolHandler, ToolSpec};

const DEFAULT_MAX_RESULTS: usize = 200;
const DEFAULT_TREE_DEPTH: usize = 3;
const DEFAULT_TREE_ENTRIES: usize = 500;

fn max_results(args: &serde_json::Value) -> usize {
    args.get("max_results")
        .and_then(serde_json::Value::as_u64)
        .map_or(DEFAULT_MAX_RESULTS, |n| (n as usize).max(1))
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| AgentError::ToolExecution(format!("invalid glob: {e}")))
}

/// Search file contents for a regex pattern.
pub struct GrepSearch {
    sandbox: Arc<Sandbox>,
}

impl GrepSearch {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for GrepSearch {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep_search".to_string(),
            description:
                "Search file contents for a regex pattern. Returns matching lines with file paths and line numbers."
                    .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex pattern to search for" },
                    "path": { "type": "string", "description": "Directory to search in (default: working directory)" },
                    "glob": { "type": "string", "description": "File name filter, e.g. '*.rs'" },
                    "max_results": { "type": "integer" },
                    "case_sensitive": { "type": "boolean" }
                },
                "required": ["pattern"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let pattern = required_str(args, "pattern")?.to_string();
        let root = self
            .sandbox
            .resolve(args.get("path").and_then(|v| v.as_str()).unwrap_or("."))?;
        let limit = max_results(args);
        let case_sensitive = args
            .get("case_sensitive")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let glob = args
            .get("glob")
            .and_then(|v| v.as_str())
            .map(compile_glob)
            .transpose()?;

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| AgentError::ToolExecution(format!("invalid pattern: {e}")))?;

        let sandbox_root = self.sandbox.root().to_path_buf();
        tracing::debug!(pattern = %pattern, root = %root.display(), "grep search");

        let output = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let mut truncated = false;

            'walk: for entry in WalkBuilder::new(&root).build().flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(matcher) = &glob {
                    let name = path.file_name().map(|n| n.to_string_lossy());
                    if !name.is_some_and(|n| matcher.is_match(n.as_ref())) {
                        continue;
                    }
                }

                let Ok(text) = std::fs::read_to_string(path) else {
                    continue;
                };

                let display = path.strip_prefix(&sandbox_root).unwrap_or(path);
                for (idx, line) in text.lines().enumerate() {
                    if regex.is_match(line) {
                        if matches.len() >= limit {
                            truncated = true;
                            break 'walk;
                        }
                        matches.push(format!("{}:{}: {line}", display.display(), idx + 1));
                    }
                }
            }

            render_results(&matches, truncated, "No matches found")
        })
        .await
        .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        Ok(output)
    }
}

/// Find files by glob pattern.
pub struct FindFiles {
    sandbox: Arc<Sandbox>,
}

impl FindFiles {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for FindFiles {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "find_files".to_string(),
            description: "Find files matching a glob pattern, e.g. '**/*.rs'.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Glob pattern" },
                    "root": { "type": "string", "description": "Directory to search in (default: working directory)" },
                    "max_results": { "type": "integer" }
                },
                "required": ["pattern"]
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let pattern = required_str(args, "pattern")?;
        let root = self
            .sandbox
            .resolve(args.get("root").and_then(|v| v.as_str()).unwrap_or("."))?;
        let limit = max_results(args);
        let matcher = compile_glob(pattern)?;

        tracing::debug!(pattern = %pattern, root = %root.display(), "find files");

        let output = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let mut truncated = false;

            for entry in WalkBuilder::new(&root).build().flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let relative = path.strip_prefix(&root).unwrap_or(path);
                let matched = matcher.is_match(relative)
                    || path
                        .file_name()
                        .is_some_and(|n| matcher.is_match(Path::new(n)));
                if matched {
                    if matches.len() >= limit {
                        truncated = true;
                        break;
                    }
                    matches.push(relative.display().to_string());
                }
            }

            matches.sort();
            render_results(&matches, truncated, "No files found")
        })
        .await
        .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        Ok(output)
    }
}

/// Render a directory tree.
pub struct Tree {
    sandbox: Arc<Sandbox>,
}

impl Tree {
    #[must_use]
    pub fn new(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
        }
    }
}

#[async_trait]
impl ToolHandler for Tree {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "tree".to_string(),
            description: "Show the directory tree structure.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Root of the tree (default: working directory)" },
                    "max_depth": { "type": "integer" },
                    "max_entries": { "type": "integer" }
                },
                "required": []
            }),
            destructive: false,
        }
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<String> {
        let root = self
            .sandbox
            .resolve(args.get("path").and_then(|v| v.as_str()).unwrap_or("."))?;
        let max_depth = args
            .get("max_depth")
            .and_then(serde_json::Value::as_u64)
            .map_or(DEFAULT_TREE_DEPTH, |d| (d as usize).max(1));
        let max_entries = args
            .get("max_entries")
            .and_then(serde_json::Value::as_u64)
            .map_or(DEFAULT_TREE_ENTRIES, |e| (e as usize).max(1));

        if !root.exists() {
            return Err(AgentError::ToolExecution(format!(
                "path not found: {}",
                root.display()
            )));
        }

        let output = tokio::task::spawn_blocking(move || {
            let label = root
                .file_name()
                .map_or_else(|| root.display().to_string(), |n| n.to_string_lossy().to_string());
            let mut lines = vec![label];
            let mut entry_count = 0_usize;
            render_tree(&root, "", 1, max_depth, max_entries, &mut entry_count, &mut lines);
            lines.join("\n")
        })
        .await
        .map_err(|e| AgentError::ToolExecution(e.to_string()))?;

        Ok(output)
    }
}

fn render_tree(
    dir: &Path,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    max_entries: usize,
    entry_count: &mut usize,
    lines: &mut Vec<String>,
) {
    if depth > max_depth || *entry_count >= max_entries {
        return;
    }

    let Ok(read) = std::fs::read_dir(dir) else {
        return;
    };

    let mut children: Vec<_> = read.flatten().collect();
    children.sort_by_key(|c| {
        let is_file = c.file_type().map_or(true, |t| !t.is_dir());
        (is_file, c.file_name().to_ascii_lowercase())
    });

    let last = children.len().saturating_sub(1);
    for (index, child) in children.iter().enumerate() {
        *entry_count += 1;
        if *entry_count > max_entries {
            lines.push(format!("{prefix}... (truncated)"));
            return;
        }

        let connector = if index == last { "`-- " } else { "|-- " };
        lines.push(format!(
            "{prefix}{connector}{}",
            child.file_name().to_string_lossy()
        ));

        if child.file_type().is_ok_and(|t| t.is_dir()) && depth < max_depth {
            let extension = if index == last { "    " } else { "|   " };
            render_tree(
                &child.path(),
                &format!("{prefix}{extension}"),
                depth + 1,
                max_depth,
                max_entries,
                entry_count,
                lines,
            );
        }
    }
}

fn render_results(matches: &[String], truncated: bool, empty_message: &str) -> String {
    if matches.is_empty() {
        return empty_message.to_string();
    }

    let mut output = matches.join("\n");
    if truncated {
        output.push_str("\n\n(Results truncated. Use a more specific pattern or path.)");
    }
    output
}
