use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use weftcore::{SourceConfig, Value, VertexError};

/// Entry vertex: publishes the invocation inputs as its outputs
pub struct SourceVertex {
    config: SourceConfig,
}

impl SourceVertex {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Vertex for SourceVertex {
    fn kind(&self) -> &str {
        "start"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let mut outputs = ctx.inputs.clone();
        for variable in &self.config.variables {
            let present = outputs.get(&variable.variable).is_some_and(|v| !v.is_null());
            if present {
                continue;
            }
            let value = match (&variable.default, variable.required) {
                (Some(default), _) => default.clone(),
                (None, true) => return Err(VertexError::MissingInput(variable.variable.clone())),
                (None, false) => Value::Null,
            };
            outputs.insert(variable.variable.clone(), value);
        }
        Ok(VertexOutput::new().with_outputs(outputs))
    }
}
