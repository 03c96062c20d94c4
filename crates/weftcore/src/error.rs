use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolution error in vertex '{vertex}': {source}")]
    Resolution {
        vertex: String,
        #[source]
        source: ResolveError,
    },

    #[error("Workflow document error: {0}")]
    Dsl(#[from] DslError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural problems found while building a graph. Execution never starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate vertex id: {0}")]
    DuplicateVertex(String),

    #[error("Vertex id '{0}' is reserved")]
    ReservedVertexId(String),

    #[error("Edge {source_id} -> {target} references unknown vertex '{missing}'")]
    DanglingEdge {
        source_id: String,
        target: String,
        missing: String,
    },

    #[error("Cyclic dependency detected at vertex '{0}'")]
    CyclicDependency(String),

    #[error("Vertex '{0}' has no incoming edge")]
    MissingIncomingEdge(String),

    #[error("Source vertex '{0}' cannot have incoming edges")]
    SourceWithIncomingEdge(String),

    #[error("Graph has no sink vertex")]
    NoSink,

    #[error("Input port '{port}' of vertex '{vertex}' is not bound and has no default")]
    UnboundInputPort { vertex: String, port: String },

    #[error("Edge targets undeclared port '{port}' of vertex '{vertex}'")]
    UndeclaredPort { vertex: String, port: String },

    #[error("Input port '{port}' of vertex '{vertex}' has more than one incoming edge")]
    DuplicatePortBinding { vertex: String, port: String },

    #[error("Edge from '{source_id}' carries branch label '{label}' but the source is not a condition")]
    BranchOnNonCondition { source_id: String, label: String },

    #[error("Edge {source_id} -> {target} leaves a condition without a branch label")]
    MissingBranchLabel { source_id: String, target: String },

    #[error("Condition '{vertex}' has no branch named '{label}'")]
    UnknownBranch { vertex: String, label: String },

    #[error("Vertex '{vertex}' references '{reference}', which is not upstream of it")]
    UnknownReference { vertex: String, reference: String },

    #[error("Vertex '{vertex}' uses unregistered tool '{tool}'")]
    UnknownTool { vertex: String, tool: String },

    #[error("Invalid configuration for vertex '{vertex}': {reason}")]
    InvalidConfig { vertex: String, reason: String },

    #[error("Invalid expression in vertex '{vertex}': {reason}")]
    InvalidExpression { vertex: String, reason: String },

    #[error("In inner graph of '{vertex}': {source}")]
    Nested {
        vertex: String,
        #[source]
        source: Box<ValidationError>,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Missing reference: vertex '{vertex}' has not produced '{field}'")]
    MissingReference { vertex: String, field: String },

    #[error("Missing {scope} variable: {name}")]
    MissingVariable { scope: String, name: String },

    #[error("Malformed placeholder: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone)]
pub enum VertexError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("Model call failed: {0}")]
    ModelCall(#[from] ServiceError),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Round cap exceeded after {max_rounds} rounds")]
    RoundCapExceeded { max_rounds: u32 },

    #[error("Tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Failures reported by a model / embedding / retrieval backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport(_)
            | ServiceError::RateLimited { .. }
            | ServiceError::Stream(_) => true,
            ServiceError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct ExpressionError {
    pub message: String,
    pub offset: usize,
}

impl ExpressionError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

#[derive(Error, Debug)]
pub enum DslError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported node type '{node_type}' on node '{node}'")]
    UnsupportedNodeType { node: String, node_type: String },

    #[error("Invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("Document has no workflow graph")]
    MissingGraph,
}
