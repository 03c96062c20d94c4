use crate::graph::{ExecutionResult, GraphInner, VertexReport};
use crate::vertex::{VertexContext, VertexOutput};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use weftcore::{
    Context, EventEmitter, EventSink, ExecutionId, ExecutionOutcome, GraphError, Outputs,
    ResolveError, Value, VertexError, VertexStatus,
};

/// Everything one run of a graph level needs besides the graph itself.
pub(crate) struct RunScope {
    pub execution_id: ExecutionId,
    pub sink: EventSink,
    pub cancellation: CancellationToken,
    pub streaming: bool,
    /// Inputs handed to source vertices
    pub inputs: HashMap<String, Value>,
}

type TaskResult = (usize, Result<VertexOutput, VertexError>, u64);

struct Scheduler<'a> {
    graph: &'a GraphInner,
    scope: RunScope,
    context: Context,
    status: Vec<VertexStatus>,
    branches: Vec<Option<String>>,
    durations: Vec<Option<u64>>,
    completed: Vec<usize>,
}

/// Run one graph level to completion, cancellation or a fatal error.
pub(crate) async fn run(
    graph: &GraphInner,
    context: Context,
    scope: RunScope,
) -> Result<ExecutionResult, GraphError> {
    let n = graph.vertices.len();
    Scheduler {
        graph,
        scope,
        context,
        status: vec![VertexStatus::Pending; n],
        branches: vec![None; n],
        durations: vec![None; n],
        completed: Vec::new(),
    }
    .run()
    .await
}

impl<'a> Scheduler<'a> {
    async fn run(mut self) -> Result<ExecutionResult, GraphError> {
        let mut running: FuturesUnordered<JoinHandle<TaskResult>> = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            // Settle pending vertices whose incoming edges are all decided
            let ready = self.settle();

            // Spawn tasks for ready vertices up to parallel limit
            for i in ready {
                if running.len() >= self.graph.max_parallel {
                    break;
                }
                match self.dispatch(i) {
                    Ok(handle) => running.push(handle),
                    Err(e) => {
                        abort_all(&running);
                        return Err(e);
                    }
                }
            }

            // If nothing is running and nothing is ready, we're done
            if running.is_empty() {
                break;
            }

            // Wait for next task to complete
            let joined = tokio::select! {
                biased;
                _ = self.scope.cancellation.cancelled() => None,
                joined = running.next() => joined,
            };
            let Some(joined) = joined else {
                cancelled = true;
                break;
            };

            let (i, result, duration_ms) =
                joined.map_err(|e| GraphError::Execution(format!("Task join error: {}", e)))?;
            self.durations[i] = Some(duration_ms);
            let id = self.graph.vertices[i].spec.id.clone();

            match result {
                Ok(output) => {
                    tracing::info!("Vertex {} completed in {}ms", id, duration_ms);
                    if let Err(e) = self.context.set_outputs(&id, output.outputs) {
                        abort_all(&running);
                        return Err(e);
                    }
                    self.branches[i] = output.branch;
                    self.completed.push(i);
                    self.set_status(i, VertexStatus::Completed);
                }
                Err(VertexError::Resolution(source)) => {
                    tracing::error!("Vertex {} could not resolve its inputs: {}", id, source);
                    abort_all(&running);
                    return Err(GraphError::Resolution { vertex: id, source });
                }
                Err(VertexError::Cancelled) if self.scope.cancellation.is_cancelled() => {
                    cancelled = true;
                    self.set_status(i, VertexStatus::Cancelled);
                    break;
                }
                Err(e) => {
                    tracing::error!("Vertex {} failed: {}", id, e);
                    self.emitter(i).error(e.to_string());
                    self.set_status(i, VertexStatus::Failed { reason: e.to_string() });
                }
            }
        }

        if cancelled {
            tracing::warn!("Execution {} cancelled", self.scope.execution_id);
            abort_all(&running);
            for i in 0..self.status.len() {
                if self.status[i] == VertexStatus::Running {
                    self.set_status(i, VertexStatus::Cancelled);
                }
            }
        }

        Ok(self.finish(cancelled))
    }

    /// Decide every pending vertex whose sources are all terminal: fail it
    /// when a source failed, skip it when no incoming edge is active, and
    /// return the rest as ready, in topological order.
    fn settle(&mut self) -> Vec<usize> {
        let graph = self.graph;
        let mut ready = Vec::new();
        for &i in &graph.order {
            if self.status[i] != VertexStatus::Pending {
                continue;
            }
            let incoming = &graph.incoming[i];
            if incoming.is_empty() {
                ready.push(i);
                continue;
            }
            if !incoming
                .iter()
                .all(|&k| self.status[graph.edges[k].source].is_terminal())
            {
                continue;
            }

            if let Some(&k) = incoming
                .iter()
                .find(|&&k| self.status[graph.edges[k].source].is_failed())
            {
                let upstream = &graph.vertices[graph.edges[k].source].spec.id;
                self.set_status(
                    i,
                    VertexStatus::Failed {
                        reason: format!("upstream vertex '{}' failed", upstream),
                    },
                );
            } else if incoming.iter().any(|&k| self.edge_active(k)) {
                ready.push(i);
            } else {
                tracing::debug!("Vertex {} skipped: no active incoming edge", graph.vertices[i].spec.id);
                self.context.mark_skipped(&graph.vertices[i].spec.id);
                self.set_status(i, VertexStatus::Skipped);
            }
        }
        ready
    }

    fn edge_active(&self, k: usize) -> bool {
        let edge = &self.graph.edges[k];
        self.status[edge.source] == VertexStatus::Completed
            && match &edge.spec.branch {
                None => true,
                Some(label) => self.branches[edge.source].as_deref() == Some(label.as_str()),
            }
    }

    fn dispatch(&mut self, i: usize) -> Result<JoinHandle<TaskResult>, GraphError> {
        let graph = self.graph;
        let compiled = &graph.vertices[i];
        let inputs = self.collect_inputs(i).map_err(|source| GraphError::Resolution {
            vertex: compiled.spec.id.clone(),
            source,
        })?;

        let ctx = VertexContext {
            vertex_id: compiled.spec.id.clone(),
            execution_id: self.scope.execution_id,
            context: self.context.clone(),
            inputs,
            events: self.emitter(i),
            cancellation: self.scope.cancellation.child_token(),
            streaming: self.scope.streaming,
        };
        self.set_status(i, VertexStatus::Running);

        let vertex = compiled.vertex.clone();
        let task = async move {
            let start = Instant::now();
            let result = vertex.execute(ctx).await;
            (i, result, start.elapsed().as_millis() as u64)
        };

        // Apply timeout if specified
        Ok(match self.graph.vertex_timeout_ms {
            Some(ms) => tokio::spawn(async move {
                match timeout(Duration::from_millis(ms), task).await {
                    Ok(result) => result,
                    Err(_) => (i, Err(VertexError::Timeout { ms }), ms),
                }
            }),
            None => tokio::spawn(task),
        })
    }

    /// Port values from active incoming edges, falling back to port
    /// defaults. Source vertices receive the invocation inputs.
    fn collect_inputs(&self, i: usize) -> Result<HashMap<String, Value>, ResolveError> {
        let spec = &self.graph.vertices[i].spec;
        if spec.kind.is_source() {
            return Ok(self.scope.inputs.clone());
        }

        let mut inputs: HashMap<String, Value> = spec
            .ports
            .iter()
            .map(|p| (p.name.clone(), p.default.clone().unwrap_or(Value::Null)))
            .collect();

        for &k in &self.graph.incoming[i] {
            let edge = &self.graph.edges[k];
            let Some(port) = &edge.spec.target_port else {
                continue;
            };
            if !self.edge_active(k) {
                continue;
            }
            let outputs = self.context.output(&edge.spec.source).ok_or_else(|| {
                ResolveError::MissingReference {
                    vertex: edge.spec.source.clone(),
                    field: edge.spec.source_port.clone().unwrap_or_default(),
                }
            })?;
            let value = match &edge.spec.source_port {
                Some(field) => outputs.get(field).cloned().ok_or_else(|| ResolveError::MissingReference {
                    vertex: edge.spec.source.clone(),
                    field: field.clone(),
                })?,
                None => Value::Object(outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            };
            inputs.insert(port.clone(), value);
        }
        Ok(inputs)
    }

    fn emitter(&self, i: usize) -> EventEmitter {
        EventEmitter::new(
            self.scope.execution_id,
            self.graph.vertices[i].spec.id.clone(),
            self.scope.sink.clone(),
        )
    }

    fn set_status(&mut self, i: usize, status: VertexStatus) {
        self.emitter(i).status(status.clone());
        self.status[i] = status;
    }

    fn finish(self, cancelled: bool) -> ExecutionResult {
        let graph = self.graph;
        let sinks: Vec<usize> = (0..graph.vertices.len())
            .filter(|&i| graph.vertices[i].spec.kind.is_sink())
            .collect();

        let mut outputs = Outputs::new();
        let mut sink_outputs = BTreeMap::new();
        for &i in self.completed.iter().filter(|i| sinks.contains(i)) {
            let id = &graph.vertices[i].spec.id;
            if let Some(values) = self.context.output(id) {
                outputs.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                sink_outputs.insert(id.clone(), values.clone());
            }
        }

        let outcome = if cancelled {
            ExecutionOutcome::Cancelled
        } else if let Some(&failed) = sinks.iter().find(|&&i| self.status[i].is_failed()) {
            let reason = match &self.status[failed] {
                VertexStatus::Failed { reason } => reason.clone(),
                _ => String::new(),
            };
            ExecutionOutcome::Failed {
                reason: format!("sink vertex '{}' failed: {}", graph.vertices[failed].spec.id, reason),
            }
        } else if sink_outputs.is_empty() {
            ExecutionOutcome::Failed {
                reason: "no sink vertex completed".to_string(),
            }
        } else {
            ExecutionOutcome::Completed
        };

        let vertices = graph
            .vertices
            .iter()
            .enumerate()
            .map(|(i, v)| {
                (
                    v.spec.id.clone(),
                    VertexReport {
                        status: self.status[i].clone(),
                        duration_ms: self.durations[i],
                    },
                )
            })
            .collect();

        ExecutionResult {
            execution_id: self.scope.execution_id,
            outcome,
            outputs,
            sink_outputs,
            vertices,
            order: self
                .completed
                .iter()
                .map(|&i| graph.vertices[i].spec.id.clone())
                .collect(),
            context: self.context,
        }
    }
}

fn abort_all(running: &FuturesUnordered<JoinHandle<TaskResult>>) {
    for handle in running.iter() {
        handle.abort();
    }
}
