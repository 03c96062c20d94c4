use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use weftcore::{Resolver, TemplateConfig, Value, VertexError};

/// Renders a text template over its declared variables
pub struct TemplateVertex {
    config: TemplateConfig,
}

impl TemplateVertex {
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Vertex for TemplateVertex {
    fn kind(&self) -> &str {
        "template-transform"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut variables = ctx.inputs.clone();
        for binding in &self.config.variables {
            let value = match binding.template_text() {
                Some(template) => resolver.resolve(&template)?,
                None => Value::Null,
            };
            variables.insert(binding.variable.clone(), value);
        }

        let rendered = Resolver::new(&ctx.context)
            .with_bindings(&variables)
            .render(&self.config.template)?;
        Ok(VertexOutput::new().with_output("output", rendered))
    }
}
