//! Core abstractions for the weft graph engine
//!
//! This crate provides the data model every other component depends on:
//! values, the execution context and its placeholder resolver, condition
//! expressions, vertex and edge definitions, workflow documents, events and
//! the service boundary to model backends. It does not schedule anything.

mod context;
pub mod dsl;
mod error;
pub mod events;
pub mod expression;
mod message;
pub mod resolver;
mod service;
mod status;
mod tool;
mod value;
mod workflow;

pub use context::{Context, Outputs};
pub use dsl::{ImportedWorkflow, WorkflowDocument};
pub use error::{
    DslError, ExpressionError, GraphError, ResolveError, ServiceError, ToolError, ValidationError,
    VertexError,
};
pub use events::*;
pub use message::{Message, Role, ToolCall, ToolResult};
pub use resolver::{Reference, Resolver};
pub use service::{
    EmbeddingRequest, FinishReason, ModelDelta, ModelParameters, ModelRequest, ModelResponse,
    ModelService, ModelStream, RetrievalRequest, RetrievedDocument, ToolCallDelta, Usage,
    response_into_deltas,
};
pub use status::{ExecutionOutcome, VertexStatus};
pub use tool::{Tool, ToolContext, ToolDefinition};
pub use value::Value;
pub use workflow::{
    ConditionCase, ConditionConfig, ConditionItem, EdgeSpec, EmbeddingConfig, FunctionConfig,
    GraphDefinition, GraphSettings, GroupConfig, InputPort, InputVariable, LlmConfig,
    LogicalOperator, LoopConfig, LoopVariable, ModelSelection, ParameterKind, Position,
    PromptMessage, RetrievalConfig, RetryPolicy, SinkConfig, SourceConfig, TemplateConfig,
    ToolParameter, VariableBinding, VertexId, VertexKind, VertexSpec, ELSE_BRANCH, RESERVED_IDS,
};

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
