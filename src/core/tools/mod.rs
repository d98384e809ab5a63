//! Built-in tools and the sandbox they run against.

pub mod fs;
pub mod search;
pub mod shell;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::agent::{AgentError, Result, ToolHandler, ToolRegistry};

/// Execution context shared by every tool: the working-directory root all
/// paths are resolved against, plus subprocess and output limits.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    command_timeout: Duration,
    max_output_lines: usize,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the root cannot be created or canonicalized.
    pub fn new(
        root: impl Into<PathBuf>,
        command_timeout: Duration,
        max_output_lines: usize,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| AgentError::Config(format!("cannot create working directory: {e}")))?;
        let root = root
            .canonicalize()
            .map_err(|e| AgentError::Config(format!("cannot resolve working directory: {e}")))?;

        Ok(Self {
            root,
            command_timeout,
            max_output_lines,
        })
    }

    /// The sandbox root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default timeout for shell and code execution.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Maximum stdout/stderr lines kept from tool output.
    #[must_use]
    pub const fn max_output_lines(&self) -> usize {
        self.max_output_lines
    }

    /// Resolve a tool-supplied path against the root.
    ///
    /// Purely lexical: relative paths are joined to the root, `.`/`..`
    /// components are folded, and the result must stay inside the root.
    /// Runs before any I/O, so escapes are refused without touching the
    /// filesystem.
    ///
    /// # Errors
    ///
    /// Returns `PathEscape` for any path outside the root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(AgentError::PathEscape(raw.to_string()));
                    }
                }
                other => normalized.push(other),
            }
        }

        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(AgentError::PathEscape(raw.to_string()))
        }
    }
}

/// Build a registry holding every built-in tool, bound to `sandbox`.
///
/// # Errors
///
/// Returns `DuplicateTool` if two built-ins declare the same name (a bug).
pub fn builtin_registry(sandbox: &Arc<Sandbox>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    let handlers: Vec<Arc<dyn ToolHandler>> = vec![
        Arc::new(fs::ReadFile::new(sandbox)),
        Arc::new(fs::WriteFile::new(sandbox)),
        Arc::new(fs::EditFile::new(sandbox)),
        Arc::new(fs::DeleteFile::new(sandbox)),
        Arc::new(fs::ListDirectory::new(sandbox)),
        Arc::new(fs::CreateDirectory::new(sandbox)),
        Arc::new(fs::MoveFile::new(sandbox)),
        Arc::new(fs::CopyFile::new(sandbox)),
        Arc::new(fs::FileInfo::new(sandbox)),
        Arc::new(shell::RunCommand::new(sandbox)),
        Arc::new(shell::RunPython::new(sandbox)),
        Arc::new(search::GrepSearch::new(sandbox)),
        Arc::new(search::FindFiles::new(sandbox)),
        Arc::new(search::Tree::new(sandbox)),
    ];

    for handler in handlers {
        registry.register(handler)?;
    }

    Ok(registry)
}

/// Pull a required string argument out of a tool payload.
pub(crate) fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentError::ToolExecution(format!("missing {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), Duration::from_secs(5), 200).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let (_dir, sandbox) = sandbox();
        let resolved = sandbox.resolve("src/main.rs").unwrap();
        assert_eq!(resolved, sandbox.root().join("src/main.rs"));
    }

    #[test]
    fn resolve_accepts_absolute_paths_inside_root() {
        let (_dir, sandbox) = sandbox();
        let inside = sandbox.root().join("notes.txt");
        let resolved = sandbox.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn resolve_folds_dot_components() {
        let (_dir, sandbox) = sandbox();
        let resolved = sandbox.resolve("./a/./b/../c.txt").unwrap();
        assert_eq!(resolved, sandbox.root().join("a/c.txt"));
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let (_dir, sandbox) = sandbox();
        for escape in ["../../etc", "../sibling", "a/../../outside"] {
            assert!(
                matches!(sandbox.resolve(escape), Err(AgentError::PathEscape(_))),
                "escaped via {escape}"
            );
        }
    }

    #[test]
    fn resolve_rejects_absolute_paths_outside_root() {
        let (_dir, sandbox) = sandbox();
        assert!(matches!(
            sandbox.resolve("/etc/passwd"),
            Err(AgentError::PathEscape(_))
        ));
    }

    #[test]
    fn every_builtin_validates_required_fields() {
        let (_dir, sandbox) = sandbox();
        let registry = builtin_registry(&Arc::new(sandbox)).unwrap();

        for tool in registry.schemas() {
            let required: Vec<String> = tool.input_schema["required"]
                .as_array()
                .map(|r| {
                    r.iter()
                        .filter_map(|f| f.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();

            // An empty payload is rejected exactly when fields are required.
            let empty = registry.validate(&tool.name, &serde_json::json!({}));
            assert_eq!(empty.is_err(), !required.is_empty(), "tool {}", tool.name);

            // A minimal payload with every required field present passes.
            let mut payload = serde_json::Map::new();
            for field in &required {
                let sample = match tool.input_schema["properties"][field]["type"].as_str() {
                    Some("integer" | "number") => serde_json::json!(1),
                    Some("boolean") => serde_json::json!(true),
                    Some("array") => serde_json::json!([]),
                    Some("object") => serde_json::json!({}),
                    _ => serde_json::json!("x"),
                };
                payload.insert(field.clone(), sample);
            }
            registry
                .validate(&tool.name, &serde_json::Value::Object(payload))
                .unwrap_or_else(|e| panic!("minimal payload rejected for {}: {e}", tool.name));
        }
    }

    #[test]
    fn builtin_registry_registers_all_tools() {
        let (_dir, sandbox) = sandbox();
        let registry = builtin_registry(&Arc::new(sandbox)).unwrap();
        let names: Vec<String> = registry.schemas().into_iter().map(|t| t.name).collect();

        for expected in [
            "read_file",
            "write_file",
            "edit_file",
            "delete_file",
            "list_directory",
            "create_directory",
            "move_file",
            "copy_file",
            "file_info",
            "run_command",
            "run_python",
            "grep_search",
            "find_files",
            "tree",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
