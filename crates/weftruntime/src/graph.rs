use crate::scheduler::{self, RunScope};
use crate::services::Services;
use crate::vertex::Vertex;
use crate::vertices;
use chrono::Utc;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weftcore::{
    resolver, Context, EdgeSpec, EventSink, ExecutionEvent, ExecutionId, ExecutionOutcome,
    GraphDefinition, GraphError, ImportedWorkflow, Outputs, Reference, ValidationError, Value, VertexId, VertexKind,
    VertexSpec, VertexStatus, RESERVED_IDS,
};

/// A validated, executable graph. Cheap to clone.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

pub(crate) struct GraphInner {
    pub id: String,
    pub vertices: Vec<CompiledVertex>,
    pub edges: Vec<CompiledEdge>,
    /// Incoming edge indices per vertex
    pub incoming: Vec<Vec<usize>>,
    /// Vertex indices in topological order
    pub order: Vec<usize>,
    pub max_parallel: usize,
    pub vertex_timeout_ms: Option<u64>,
}

pub(crate) struct CompiledVertex {
    pub spec: VertexSpec,
    pub vertex: Arc<dyn Vertex>,
}

pub(crate) struct CompiledEdge {
    pub source: usize,
    pub target: usize,
    pub spec: EdgeSpec,
}

/// Per-invocation options
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub streaming: bool,
    pub env: HashMap<String, Value>,
    pub user: HashMap<String, Value>,
    pub cancellation: CancellationToken,
    /// Where events go. Without a sink, events are dropped.
    pub events: Option<EventSink>,
}

impl ExecuteOptions {
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }
}

/// Options seeded with an imported document's environment and
/// conversation variables.
impl From<&ImportedWorkflow> for ExecuteOptions {
    fn from(imported: &ImportedWorkflow) -> Self {
        Self {
            env: imported.environment.clone(),
            user: imported.conversation.clone(),
            ..Self::default()
        }
    }
}

/// Final status and timing of one vertex
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexReport {
    pub status: VertexStatus,
    pub duration_ms: Option<u64>,
}

/// Result of one graph invocation
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub outcome: ExecutionOutcome,
    /// Outputs of all completed sinks merged; later sinks win on key clashes
    pub outputs: Outputs,
    pub sink_outputs: BTreeMap<VertexId, Outputs>,
    pub vertices: BTreeMap<VertexId, VertexReport>,
    /// Vertices in the order they completed
    pub order: Vec<VertexId>,
    pub context: Context,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn status(&self, vertex: &str) -> Option<&VertexStatus> {
        self.vertices.get(vertex).map(|r| &r.status)
    }

    pub fn output(&self, vertex: &str, field: &str) -> Option<&Value> {
        self.context.output(vertex).and_then(|o| o.get(field))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let outputs = |o: &Outputs| {
            serde_json::Value::Object(o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
        };
        serde_json::json!({
            "execution_id": self.execution_id,
            "outcome": self.outcome,
            "outputs": outputs(&self.outputs),
            "vertices": self.vertices,
            "order": self.order,
        })
    }
}

/// Live event stream of one invocation plus its final result.
///
/// Events are queued without bound until polled. A caller that only wants
/// the result should call [`ExecutionStream::result`] straight away, which
/// closes the queue so later events are discarded instead of buffered.
pub struct ExecutionStream {
    events: UnboundedReceiverStream<ExecutionEvent>,
    handle: JoinHandle<Result<ExecutionResult, GraphError>>,
}

impl ExecutionStream {
    /// Wait for the invocation to finish. Events not yet consumed are dropped.
    pub async fn result(self) -> Result<ExecutionResult, GraphError> {
        let Self { events, handle } = self;
        drop(events);
        handle
            .await
            .map_err(|e| GraphError::Execution(format!("Task join error: {}", e)))?
    }
}

impl Stream for ExecutionStream {
    type Item = ExecutionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Graph {
    /// Validate a definition and compile it against the given services.
    pub fn build(definition: &GraphDefinition, services: &Services) -> Result<Graph, GraphError> {
        Ok(Self::compile(definition, services, None)?)
    }

    /// Compile a graph. `enclosing` names a loop whose pseudo-output the
    /// graph's templates may read.
    pub(crate) fn compile(
        definition: &GraphDefinition,
        services: &Services,
        enclosing: Option<&str>,
    ) -> Result<Graph, ValidationError> {
        let specs = &definition.vertices;

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if RESERVED_IDS.contains(&spec.id.as_str()) {
                return Err(ValidationError::ReservedVertexId(spec.id.clone()));
            }
            if index.insert(spec.id.as_str(), i).is_some() || enclosing == Some(spec.id.as_str()) {
                return Err(ValidationError::DuplicateVertex(spec.id.clone()));
            }
        }

        // Build dependency graph
        let mut dag: DiGraph<usize, usize> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..specs.len()).map(|i| dag.add_node(i)).collect();
        let mut edges = Vec::with_capacity(definition.edges.len());
        let mut incoming = vec![Vec::new(); specs.len()];
        for (k, edge) in definition.edges.iter().enumerate() {
            let lookup = |id: &str| {
                index.get(id).copied().ok_or_else(|| ValidationError::DanglingEdge {
                    source_id: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: id.to_string(),
                })
            };
            let source = lookup(&edge.source)?;
            let target = lookup(&edge.target)?;
            dag.add_edge(nodes[source], nodes[target], k);
            incoming[target].push(k);
            edges.push(CompiledEdge {
                source,
                target,
                spec: edge.clone(),
            });
        }

        let order: Vec<usize> = toposort(&dag, None)
            .map_err(|cycle| ValidationError::CyclicDependency(specs[dag[cycle.node_id()]].id.clone()))?
            .into_iter()
            .map(|n| dag[n])
            .collect();

        for (i, spec) in specs.iter().enumerate() {
            match (spec.kind.is_source(), incoming[i].is_empty()) {
                (true, false) => return Err(ValidationError::SourceWithIncomingEdge(spec.id.clone())),
                (false, true) => return Err(ValidationError::MissingIncomingEdge(spec.id.clone())),
                _ => {}
            }
        }
        if !specs.iter().any(|s| s.kind.is_sink()) {
            return Err(ValidationError::NoSink);
        }

        validate_ports(specs, &edges)?;
        validate_branches(specs, &edges)?;

        for (i, spec) in specs.iter().enumerate() {
            let upstream = ancestors(&dag, nodes[i]);
            for reference in vertex_references(spec)? {
                let Some(target) = reference.vertex() else {
                    continue;
                };
                let visible = index.get(target).is_some_and(|t| upstream.contains(t))
                    || enclosing == Some(target)
                    || (matches!(spec.kind, VertexKind::Loop(_)) && target == spec.id);
                if !visible {
                    return Err(ValidationError::UnknownReference {
                        vertex: spec.id.clone(),
                        reference: reference.to_placeholder(),
                    });
                }
            }
        }

        let vertices = specs
            .iter()
            .map(|spec| {
                Ok(CompiledVertex {
                    spec: spec.clone(),
                    vertex: vertices::compile(spec, services)?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        tracing::debug!(
            "Compiled graph {} with {} vertices and {} edges",
            definition.id,
            vertices.len(),
            edges.len()
        );

        Ok(Graph {
            inner: Arc::new(GraphInner {
                id: definition.id.clone(),
                vertices,
                edges,
                incoming,
                order,
                max_parallel: definition
                    .settings
                    .max_parallel_vertices
                    .unwrap_or(services.config.max_parallel_vertices)
                    .max(1),
                vertex_timeout_ms: definition.settings.vertex_timeout_ms,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Vertex ids in topological order
    pub fn topological_order(&self) -> Vec<VertexId> {
        self.inner
            .order
            .iter()
            .map(|&i| self.inner.vertices[i].spec.id.clone())
            .collect()
    }

    /// Run the graph to completion.
    pub async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, GraphError> {
        let execution_id = Uuid::new_v4();
        let start_time = Instant::now();
        let sink = options
            .events
            .clone()
            .unwrap_or_else(|| EventSink::new(broadcast::channel(16).0));

        // Emit workflow started event
        sink.send(ExecutionEvent::WorkflowStarted {
            execution_id,
            graph_id: self.inner.id.clone(),
            timestamp: Utc::now(),
        });

        tracing::info!("Starting graph execution: {} ({})", self.inner.id, execution_id);

        let context = Context::new(options.env, options.user);
        let scope = RunScope {
            execution_id,
            sink: sink.clone(),
            cancellation: options.cancellation,
            streaming: options.streaming,
            inputs,
        };
        let result = scheduler::run(&self.inner, context, scope).await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(result) => result.outcome.clone(),
            Err(e) => ExecutionOutcome::Failed {
                reason: e.to_string(),
            },
        };
        tracing::info!("Graph execution {} finished in {}ms: {:?}", execution_id, duration_ms, outcome);

        // Emit workflow finished event
        sink.send(ExecutionEvent::WorkflowFinished {
            execution_id,
            outcome,
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    /// Run the graph in the background, yielding events as they happen.
    pub fn execute_stream(&self, inputs: HashMap<String, Value>, mut options: ExecuteOptions) -> ExecutionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = options
            .events
            .take()
            .unwrap_or_else(|| EventSink::new(broadcast::channel(16).0))
            .with_stream(tx);
        let graph = self.clone();
        let handle = tokio::spawn(async move { graph.execute(inputs, options.with_events(sink)).await });
        ExecutionStream {
            events: UnboundedReceiverStream::new(rx),
            handle,
        }
    }

    /// Run as the inner graph of a loop or group vertex.
    pub(crate) async fn run_nested(
        &self,
        context: Context,
        scope: RunScope,
    ) -> Result<ExecutionResult, GraphError> {
        scheduler::run(&self.inner, context, scope).await
    }
}

fn validate_ports(specs: &[VertexSpec], edges: &[CompiledEdge]) -> Result<(), ValidationError> {
    let mut bound: HashSet<(usize, &str)> = HashSet::new();
    for edge in edges {
        let Some(port) = edge.spec.target_port.as_deref() else {
            continue;
        };
        let target = &specs[edge.target];
        if target.port(port).is_none() {
            return Err(ValidationError::UndeclaredPort {
                vertex: target.id.clone(),
                port: port.to_string(),
            });
        }
        if !bound.insert((edge.target, port)) {
            return Err(ValidationError::DuplicatePortBinding {
                vertex: target.id.clone(),
                port: port.to_string(),
            });
        }
    }
    for (i, spec) in specs.iter().enumerate() {
        for port in &spec.ports {
            if port.default.is_none() && !bound.contains(&(i, port.name.as_str())) {
                return Err(ValidationError::UnboundInputPort {
                    vertex: spec.id.clone(),
                    port: port.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_branches(specs: &[VertexSpec], edges: &[CompiledEdge]) -> Result<(), ValidationError> {
    for edge in edges {
        let source = &specs[edge.source];
        match (&source.kind, &edge.spec.branch) {
            (VertexKind::Condition(config), Some(label)) => {
                if !config.branch_labels().contains(label) {
                    return Err(ValidationError::UnknownBranch {
                        vertex: source.id.clone(),
                        label: label.clone(),
                    });
                }
            }
            (VertexKind::Condition(_), None) => {
                return Err(ValidationError::MissingBranchLabel {
                    source_id: source.id.clone(),
                    target: edge.spec.target.clone(),
                })
            }
            (_, Some(label)) => {
                return Err(ValidationError::BranchOnNonCondition {
                    source_id: source.id.clone(),
                    label: label.clone(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Indices of every vertex with a path to `start`, excluding `start`.
fn ancestors(dag: &DiGraph<usize, usize>, start: NodeIndex) -> HashSet<usize> {
    let reversed = Reversed(dag);
    let mut dfs = Dfs::new(reversed, start);
    let mut found = HashSet::new();
    while let Some(node) = dfs.next(reversed) {
        if node != start {
            found.insert(dag[node]);
        }
    }
    found
}

/// Every reference a vertex reads from the enclosing context.
fn vertex_references(spec: &VertexSpec) -> Result<Vec<Reference>, ValidationError> {
    let mut refs = Vec::new();
    for template in spec.kind.templates() {
        refs.extend(resolver::references(&template).map_err(|e| ValidationError::InvalidConfig {
            vertex: spec.id.clone(),
            reason: e.to_string(),
        })?);
    }

    let invalid = |e: weftcore::ExpressionError| ValidationError::InvalidExpression {
        vertex: spec.id.clone(),
        reason: e.to_string(),
    };
    match &spec.kind {
        VertexKind::Condition(config) => {
            for case in config.effective_cases() {
                refs.extend(case.to_expression().map_err(invalid)?.references());
            }
        }
        VertexKind::Loop(config) => {
            let expressions = [
                config.continue_expression().map_err(invalid)?,
                config.break_expression().map_err(invalid)?,
            ];
            for expression in expressions.iter().flatten() {
                refs.extend(expression.references());
            }
        }
        _ => {}
    }
    Ok(refs)
}
