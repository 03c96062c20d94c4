use super::nested;
use crate::graph::Graph;
use crate::scheduler::RunScope;
use crate::services::Services;
use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use weftcore::{ExecutionOutcome, GraphError, GroupConfig, ValidationError, Value, VertexError};

/// Runs an inner graph as one vertex. The inner graph works on a child
/// context; only the declared outputs reach the enclosing graph.
pub struct GroupVertex {
    config: GroupConfig,
    graph: Graph,
}

impl GroupVertex {
    pub fn new(vertex: &str, config: &GroupConfig, services: &Services) -> Result<Self, ValidationError> {
        Ok(Self {
            graph: Graph::compile(&config.graph, services, None).map_err(nested(vertex))?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Vertex for GroupVertex {
    fn kind(&self) -> &str {
        "group"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut inputs = ctx.inputs.clone();
        for binding in &self.config.inputs {
            let value = match binding.template_text() {
                Some(template) => resolver.resolve(&template)?,
                None => Value::Null,
            };
            inputs.insert(binding.variable.clone(), value);
        }

        let run = RunScope {
            execution_id: ctx.execution_id,
            sink: ctx.events.sink().scoped(&ctx.vertex_id),
            cancellation: ctx.cancellation.child_token(),
            streaming: ctx.streaming,
            inputs,
        };
        let result = self
            .graph
            .run_nested(ctx.context.child(), run)
            .await
            .map_err(|e| match e {
                GraphError::Resolution { source, .. } => VertexError::Resolution(source),
                other => VertexError::ExecutionFailed(other.to_string()),
            })?;

        match result.outcome {
            ExecutionOutcome::Completed => {}
            ExecutionOutcome::Cancelled => return Err(VertexError::Cancelled),
            ExecutionOutcome::Failed { reason } => return Err(VertexError::ExecutionFailed(reason)),
        }

        let mut output = VertexOutput::new();
        for name in &self.config.outputs {
            let value = result.outputs.get(name).cloned().ok_or_else(|| {
                VertexError::ExecutionFailed(format!("inner graph did not produce '{}'", name))
            })?;
            output = output.with_output(name.clone(), value);
        }
        Ok(output)
    }
}
