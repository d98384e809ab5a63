//! Tool registry: specs, handlers, and argument validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::{AgentError, Result};
use super::types::Tool;

/// Declaration of a callable tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON-Schema-style parameter object (`type: object`, `properties`,
    /// `required`), exposed verbatim to the model.
    pub parameters: serde_json::Value,
    /// Whether the tool's effect is irreversible or broad.
    pub destructive: bool,
}

impl ToolSpec {
    /// Wire-format tool definition.
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.clone(),
        }
    }
}

/// A tool implementation: its spec plus its effect.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool's declaration.
    fn spec(&self) -> ToolSpec;

    /// Execute with already-validated arguments.
    async fn execute(&self, args: &serde_json::Value) -> Result<String>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of available tools.
///
/// Keyed by name; iteration order (and thus the schema list sent to the
/// model) is deterministic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTool` if the name is already taken.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let spec = handler.spec();
        if self.tools.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }
        let name = spec.name.clone();
        self.tools.insert(name, RegisteredTool { spec, handler });
        Ok(())
    }

    /// Wire-format definitions for inclusion in the model request.
    #[must_use]
    pub fn schemas(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.spec.to_tool()).collect()
    }

    /// Look up a tool's spec.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// Resolve a name to its handler.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool` if no tool has this name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>> {
        self.tools
            .get(name)
            .map(|t| Arc::clone(&t.handler))
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Check an argument payload against the tool's declared schema.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool` for an unregistered name, or `SchemaValidation`
    /// listing every violated field.
    pub fn validate(&self, name: &str, args: &serde_json::Value) -> Result<()> {
        let spec = self
            .tools
            .get(name)
            .map(|t| &t.spec)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        let violations = schema_violations(&spec.parameters, args);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(AgentError::SchemaValidation {
                tool: name.to_string(),
                violations: violations.join("; "),
            })
        }
    }
}

/// Collect violations of a parameter object against its schema.
///
/// Covers the subset the registry declares: required fields present, and
/// declared primitive types matching. Unknown fields pass through untouched;
/// the model routinely invents optional extras and handlers ignore them.
fn schema_violations(schema: &serde_json::Value, args: &serde_json::Value) -> Vec<String> {
    let mut violations = Vec::new();

    let Some(args_obj) = args.as_object() else {
        return vec!["arguments must be a JSON object".to_string()];
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !args_obj.contains_key(field) {
                violations.push(format!("missing required field `{field}`"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, decl) in properties {
            let Some(value) = args_obj.get(field) else {
                continue;
            };
            let Some(expected) = decl.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            if !type_matches(expected, value) {
                violations.push(format!(
                    "field `{field}`: expected {expected}, got {}",
                    type_name(value)
                ));
            }
        }
    }

    violations
}

fn type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
