use async_trait::async_trait;
use serde_json::{json, Value};
use weftcore::{Tool, ToolContext, ToolError};

/// Logs its arguments and returns them unchanged
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "debug.echo"
    }

    fn description(&self) -> &str {
        "Return the arguments unchanged"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "additionalProperties": true })
    }

    fn independent(&self) -> bool {
        true
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        if let Some(message) = args.get("message").and_then(Value::as_str) {
            tracing::info!(vertex = %ctx.vertex_id, call = %ctx.call_id, "DEBUG: {}", message);
        }
        if let Value::Object(fields) = &args {
            for (key, value) in fields {
                tracing::debug!("  {}: {}", key, value);
            }
        }
        Ok(args)
    }
}
