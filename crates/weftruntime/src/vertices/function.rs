use crate::services::Services;
use crate::tool_manager;
use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use std::sync::Arc;
use weftcore::{FunctionConfig, Tool, ToolContext, ValidationError, Value, VertexError};

/// Calls one registered tool with arguments built from templates
pub struct FunctionVertex {
    config: FunctionConfig,
    tool: Arc<dyn Tool>,
}

impl FunctionVertex {
    pub fn new(vertex: &str, config: FunctionConfig, services: &Services) -> Result<Self, ValidationError> {
        let tool = services
            .tools
            .get(&config.tool_name)
            .ok_or_else(|| ValidationError::UnknownTool {
                vertex: vertex.to_string(),
                tool: config.tool_name.clone(),
            })?;
        Ok(Self { config, tool })
    }
}

#[async_trait]
impl Vertex for FunctionVertex {
    fn kind(&self) -> &str {
        "tool"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut args: serde_json::Map<String, serde_json::Value> =
            ctx.inputs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        for (name, parameter) in &self.config.tool_parameters {
            let value = match parameter.template() {
                Some(template) => resolver.resolve(&template)?,
                None => resolver.resolve_value(&parameter.value)?,
            };
            args.insert(name.clone(), value.to_json());
        }

        tracing::debug!("Calling tool {} from vertex {}", self.config.tool_name, ctx.vertex_id);
        let tool_ctx = ToolContext {
            execution_id: ctx.execution_id,
            vertex_id: ctx.vertex_id.clone(),
            call_id: format!("{}-call", ctx.vertex_id),
            cancellation: ctx.cancellation.clone(),
        };
        let result = tool_manager::invoke(self.tool.as_ref(), serde_json::Value::Object(args), tool_ctx)
            .await
            .map_err(|e| match e {
                weftcore::ToolError::Cancelled => VertexError::Cancelled,
                other => VertexError::Tool {
                    name: self.config.tool_name.clone(),
                    message: other.to_string(),
                },
            })?;

        let result = Value::from(result);
        Ok(VertexOutput::new()
            .with_output("text", result.to_text())
            .with_output("result", result))
    }
}
