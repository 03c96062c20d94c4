use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};
use weftcore::{Tool, ToolContext, ToolError};

/// Wait for a number of milliseconds, then echo the `value` argument
pub struct DelayTool;

#[async_trait]
impl Tool for DelayTool {
    fn name(&self) -> &str {
        "time.delay"
    }

    fn description(&self) -> &str {
        "Delay for `delay_ms` milliseconds (default 1000)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "delay_ms": { "type": "integer", "minimum": 0 },
                "value": {}
            }
        })
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let delay_ms = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(1000);

        tracing::debug!(vertex = %ctx.vertex_id, "Delaying for {}ms", delay_ms);

        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(ToolError::Cancelled),
            _ = sleep(Duration::from_millis(delay_ms)) => {
                Ok(args.get("value").cloned().unwrap_or(Value::Null))
            }
        }
    }
}
