use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use weftcore::{SinkConfig, Value, VertexError};

/// Terminal vertex: collects the values that make up the graph's result
pub struct SinkVertex {
    config: SinkConfig,
}

impl SinkVertex {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Vertex for SinkVertex {
    fn kind(&self) -> &str {
        "end"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut output = VertexOutput::new().with_outputs(ctx.inputs.clone());

        for binding in &self.config.outputs {
            let value = match binding.template_text() {
                Some(template) => resolver.resolve(&template)?,
                None => Value::Null,
            };
            output = output.with_output(binding.variable.clone(), value);
        }
        if let Some(answer) = &self.config.answer {
            output = output.with_output("answer", resolver.render(answer)?);
        }
        Ok(output)
    }
}
