use super::nested;
use crate::graph::Graph;
use crate::scheduler::RunScope;
use crate::services::Services;
use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use weftcore::expression::{self, Expression};
use weftcore::{
    ExecutionOutcome, GraphError, LoopConfig, Outputs, Resolver, ValidationError, Value, VertexError,
};

/// Runs its inner graph repeatedly, carrying loop variables between
/// iterations.
///
/// Before every iteration the continue condition must hold and the break
/// condition must not. Both see the loop variables as bound names and as
/// outputs of the loop vertex itself. An iteration's sink outputs replace
/// the loop variables of the same name.
pub struct LoopVertex {
    config: LoopConfig,
    continue_when: Option<Expression>,
    break_when: Option<Expression>,
    graph: Graph,
}

impl LoopVertex {
    pub fn new(vertex: &str, config: &LoopConfig, services: &Services) -> Result<Self, ValidationError> {
        if config.max_iterations == 0 {
            return Err(ValidationError::InvalidConfig {
                vertex: vertex.to_string(),
                reason: "loop_count must be at least 1".to_string(),
            });
        }
        let invalid = |e: weftcore::ExpressionError| ValidationError::InvalidExpression {
            vertex: vertex.to_string(),
            reason: e.to_string(),
        };
        Ok(Self {
            continue_when: config.continue_expression().map_err(invalid)?,
            break_when: config.break_expression().map_err(invalid)?,
            graph: Graph::compile(&config.graph, services, Some(vertex)).map_err(nested(vertex))?,
            config: config.clone(),
        })
    }

    fn should_run(&self, resolver: &Resolver<'_>) -> Result<bool, VertexError> {
        if let Some(expr) = &self.continue_when {
            if !expression::evaluate(expr, resolver)? {
                return Ok(false);
            }
        }
        if let Some(expr) = &self.break_when {
            if expression::evaluate(expr, resolver)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Vertex for LoopVertex {
    fn kind(&self) -> &str {
        "loop"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut variables = Outputs::new();
        for variable in &self.config.loop_variables {
            let value = match variable.initial_template() {
                Some(template) => resolver.resolve(&template)?,
                None => resolver.resolve_value(&variable.value)?,
            };
            variables.insert(variable.label.clone(), value);
        }

        let mut last_outputs = Outputs::new();
        let mut iterations: u32 = 0;
        loop {
            let mut bindings: HashMap<String, Value> = ctx.inputs.clone();
            bindings.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
            bindings.insert("index".to_string(), Value::from(iterations));

            let mut check_scope = ctx.context.clone();
            check_scope
                .set_outputs(&ctx.vertex_id, bindings.clone())
                .map_err(|e| VertexError::ExecutionFailed(e.to_string()))?;
            if !self.should_run(&Resolver::new(&check_scope).with_bindings(&bindings))? {
                break;
            }
            if iterations >= self.config.max_iterations {
                tracing::warn!(
                    "Loop {} stopped at its bound of {} iterations",
                    ctx.vertex_id,
                    self.config.max_iterations
                );
                break;
            }

            // Inner vertices see the loop variables as outputs of the loop vertex
            let mut inner = ctx.context.child();
            inner
                .set_outputs(&ctx.vertex_id, bindings.clone())
                .map_err(|e| VertexError::ExecutionFailed(e.to_string()))?;

            tracing::debug!("Loop {} starting iteration {}", ctx.vertex_id, iterations);
            let run = RunScope {
                execution_id: ctx.execution_id,
                sink: ctx.events.sink().scoped(&ctx.vertex_id),
                cancellation: ctx.cancellation.child_token(),
                streaming: ctx.streaming,
                inputs: bindings,
            };
            let result = self.graph.run_nested(inner, run).await.map_err(|e| match e {
                GraphError::Resolution { source, .. } => VertexError::Resolution(source),
                other => VertexError::ExecutionFailed(other.to_string()),
            })?;
            match result.outcome {
                ExecutionOutcome::Completed => {}
                ExecutionOutcome::Cancelled => return Err(VertexError::Cancelled),
                ExecutionOutcome::Failed { reason } => {
                    return Err(VertexError::ExecutionFailed(format!(
                        "iteration {} failed: {}",
                        iterations, reason
                    )))
                }
            }

            for (name, value) in &result.outputs {
                if let Some(variable) = variables.get_mut(name) {
                    *variable = value.clone();
                }
            }
            last_outputs = result.outputs;
            iterations += 1;
        }

        let mut output = VertexOutput::new().with_outputs(last_outputs);
        output = output.with_outputs(variables);
        Ok(output.with_output("iterations", iterations))
    }
}
