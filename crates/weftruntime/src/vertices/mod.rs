//! Built-in vertex kinds
//!
//! Every kind in a graph definition is compiled into one of these once, at
//! build time. Configuration problems surface as validation errors then,
//! never halfway through an execution.

mod condition;
mod embedding;
mod function;
mod group;
mod llm;
mod looping;
mod retrieval;
mod sink;
mod source;
mod template;

pub use condition::ConditionVertex;
pub use embedding::EmbeddingVertex;
pub use function::FunctionVertex;
pub use group::GroupVertex;
pub use llm::{LanguageModelVertex, ToolCallAccumulator};
pub use looping::LoopVertex;
pub use retrieval::RetrievalVertex;
pub use sink::SinkVertex;
pub use source::SourceVertex;
pub use template::TemplateVertex;

use crate::services::Services;
use crate::vertex::Vertex;
use std::sync::Arc;
use weftcore::{ValidationError, VertexKind, VertexSpec};

/// Compile a vertex definition into its executable form.
pub fn compile(spec: &VertexSpec, services: &Services) -> Result<Arc<dyn Vertex>, ValidationError> {
    let vertex: Arc<dyn Vertex> = match &spec.kind {
        VertexKind::Source(config) => Arc::new(SourceVertex::new(config.clone())),
        VertexKind::Sink(config) => Arc::new(SinkVertex::new(config.clone())),
        VertexKind::Function(config) => Arc::new(FunctionVertex::new(&spec.id, config.clone(), services)?),
        VertexKind::LanguageModel(config) => Arc::new(LanguageModelVertex::new(
            spec,
            config.clone(),
            services,
        )?),
        VertexKind::Condition(config) => Arc::new(ConditionVertex::new(&spec.id, config)?),
        VertexKind::Loop(config) => Arc::new(LoopVertex::new(&spec.id, config, services)?),
        VertexKind::Retrieval(config) => Arc::new(RetrievalVertex::new(spec, config.clone(), services)?),
        VertexKind::Embedding(config) => Arc::new(EmbeddingVertex::new(spec, config.clone(), services)),
        VertexKind::Template(config) => Arc::new(TemplateVertex::new(config.clone())),
        VertexKind::Group(config) => Arc::new(GroupVertex::new(&spec.id, config, services)?),
    };
    Ok(vertex)
}

/// Wrap an inner-graph validation failure with the owning vertex.
pub(crate) fn nested(vertex: &str) -> impl FnOnce(ValidationError) -> ValidationError + '_ {
    move |source| ValidationError::Nested {
        vertex: vertex.to_string(),
        source: Box::new(source),
    }
}
