use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use weftcore::expression::{self, Expression};
use weftcore::{ConditionConfig, ValidationError, VertexError, ELSE_BRANCH};

/// Evaluates its cases in order and activates the branch of the first match
pub struct ConditionVertex {
    cases: Vec<(String, Expression)>,
}

impl ConditionVertex {
    pub fn new(vertex: &str, config: &ConditionConfig) -> Result<Self, ValidationError> {
        let mut cases: Vec<(String, Expression)> = Vec::new();
        for case in config.effective_cases() {
            if case.case_id == ELSE_BRANCH || cases.iter().any(|(id, _)| *id == case.case_id) {
                return Err(ValidationError::InvalidConfig {
                    vertex: vertex.to_string(),
                    reason: format!("duplicate case id '{}'", case.case_id),
                });
            }
            let expr = case.to_expression().map_err(|e| ValidationError::InvalidExpression {
                vertex: vertex.to_string(),
                reason: e.to_string(),
            })?;
            cases.push((case.case_id, expr));
        }
        Ok(Self { cases })
    }
}

#[async_trait]
impl Vertex for ConditionVertex {
    fn kind(&self) -> &str {
        "if-else"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut selected: &str = ELSE_BRANCH;
        for (case_id, expr) in &self.cases {
            if expression::evaluate(expr, &resolver)? {
                selected = case_id.as_str();
                break;
            }
        }
        tracing::debug!("Condition {} selected branch {}", ctx.vertex_id, selected);
        Ok(VertexOutput::new()
            .with_output("selected_case", selected)
            .with_output("result", selected != ELSE_BRANCH)
            .with_branch(selected))
    }
}
