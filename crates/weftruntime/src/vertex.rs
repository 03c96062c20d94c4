use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use weftcore::{
    Context, EventEmitter, ExecutionId, Outputs, Resolver, Value, VertexError, VertexId,
};

/// Core trait every executable vertex implements
#[async_trait]
pub trait Vertex: Send + Sync {
    /// Vertex kind as it appears in workflow documents (e.g. "llm", "if-else")
    fn kind(&self) -> &str;

    /// Execute the vertex against a snapshot of the execution context
    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError>;
}

/// Execution context passed to each vertex
#[derive(Clone)]
pub struct VertexContext {
    pub vertex_id: VertexId,

    pub execution_id: ExecutionId,

    /// Read-only snapshot taken when the vertex was dispatched
    pub context: Context,

    /// Values bound to the vertex's input ports. For a source vertex these
    /// are the inputs of the invocation.
    pub inputs: HashMap<String, Value>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancellation token for graceful shutdown
    pub cancellation: CancellationToken,

    /// Whether model output should be streamed as it arrives
    pub streaming: bool,
}

impl VertexContext {
    /// Resolver over the snapshot with this vertex's inputs bound.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.context).with_bindings(&self.inputs)
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, VertexError> {
        self.inputs
            .get(name)
            .ok_or_else(|| VertexError::MissingInput(name.to_string()))
    }
}

/// Output from vertex execution
#[derive(Debug, Clone, Default)]
pub struct VertexOutput {
    /// Output field values, written to the context once the vertex completes
    pub outputs: Outputs,

    /// Branch chosen by a condition vertex
    pub branch: Option<String>,
}

impl VertexOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(field.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}
