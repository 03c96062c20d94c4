use async_trait::async_trait;
use serde_json::{json, Value};
use weftcore::{Tool, ToolContext, ToolError};

/// Parse a JSON string into structured data
pub struct JsonParseTool;

#[async_trait]
impl Tool for JsonParseTool {
    fn name(&self) -> &str {
        "json.parse"
    }

    fn description(&self) -> &str {
        "Parse the `json` string argument"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "json": { "type": "string" } },
            "required": ["json"]
        })
    }

    fn independent(&self) -> bool {
        true
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let input = args
            .get("json")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("json must be a string".to_string()))?;

        serde_json::from_str(input)
            .map_err(|e| ToolError::ExecutionFailed(format!("JSON parse error: {}", e)))
    }
}

/// Serialize any value to JSON text
pub struct JsonStringifyTool;

#[async_trait]
impl Tool for JsonStringifyTool {
    fn name(&self) -> &str {
        "json.stringify"
    }

    fn description(&self) -> &str {
        "Convert the `value` argument to a JSON string"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {},
                "pretty": { "type": "boolean" }
            },
            "required": ["value"]
        })
    }

    fn independent(&self) -> bool {
        true
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let value = args
            .get("value")
            .ok_or_else(|| ToolError::InvalidArguments("value is required".to_string()))?;
        let pretty = args.get("pretty").and_then(Value::as_bool).unwrap_or(false);

        let text = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| ToolError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;
        Ok(Value::String(text))
    }
}
