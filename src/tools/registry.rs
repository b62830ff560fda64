//! Tool registry - catalog, schema validation, dispatch

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::types::ToolDefinition;
use crate::trace::ActionLog;

use super::traits::Tool;

/// One catalog entry as reported by `list_tools`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Argument schema
    pub input_schema: Value,
}

/// Registry of available tools; names are unique, listing order is
/// registration order
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
    action_log: Option<ActionLog>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
            order: Vec::new(),
            action_log: None,
        }
    }

    /// Attach an action log; every `call_tool` appends one entry
    pub fn with_action_log(mut self, log: ActionLog) -> Self {
        self.action_log = Some(log);
        self
    }

    /// Register a tool; duplicate names are an error
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidArgument(format!(
                "Tool already registered: {name}"
            )));
        }
        self.order.push(name.clone());
        self.tools.insert(name, Box::new(tool));
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    /// Whether a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All catalog entries, in registration order
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// All tool definitions in the chat API format
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.to_definition())
            .collect()
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Validate arguments against the tool's schema, then invoke the handler.
    ///
    /// Returns the inner result envelope. Validation and handler errors
    /// propagate as `Err` for the host to wrap.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        validate_schema(&tool.input_schema(), arguments, "arguments")?;
        let result = tool.execute(arguments.clone()).await;

        if let Some(log) = &self.action_log {
            match &result {
                Ok(value) => log.record(name, arguments, value),
                Err(error) => log.record(
                    name,
                    arguments,
                    &serde_json::json!({
                        "ok": false,
                        "error": {"type": error.wire_type(), "message": error.to_string()},
                    }),
                ),
            }
        }

        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursive JSON-Schema-subset validator.
///
/// Supports: object (properties, required, additionalProperties:false),
/// array (items), string, boolean, integer. Failure messages name the
/// offending path so the model can self-correct.
pub fn validate_schema(schema: &Value, value: &Value, path: &str) -> Result<()> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let Some(object) = value.as_object() else {
                return Err(Error::InvalidArgument(format!("{path} must be an object")));
            };

            let properties = schema
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for key in required.iter().filter_map(Value::as_str) {
                    if !object.contains_key(key) {
                        return Err(Error::InvalidArgument(format!(
                            "Missing required field: {path}.{key}"
                        )));
                    }
                }
            }

            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                for key in object.keys() {
                    if !properties.contains_key(key) {
                        return Err(Error::InvalidArgument(format!(
                            "Unexpected field: {path}.{key}"
                        )));
                    }
                }
            }

            for (key, property_schema) in &properties {
                if let Some(nested) = object.get(key) {
                    validate_schema(property_schema, nested, &format!("{path}.{key}"))?;
                }
            }
            Ok(())
        }
        Some("array") => {
            let Some(items) = value.as_array() else {
                return Err(Error::InvalidArgument(format!("{path} must be an array")));
            };
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_schema(item_schema, item, &format!("{path}[{index}]"))?;
                }
            }
            Ok(())
        }
        Some("string") => {
            if !value.is_string() {
                return Err(Error::InvalidArgument(format!("{path} must be a string")));
            }
            Ok(())
        }
        Some("boolean") => {
            if !value.is_boolean() {
                return Err(Error::InvalidArgument(format!("{path} must be a boolean")));
            }
            Ok(())
        }
        Some("integer") => {
            if !value.is_i64() && !value.is_u64() {
                return Err(Error::InvalidArgument(format!("{path} must be an integer")));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
