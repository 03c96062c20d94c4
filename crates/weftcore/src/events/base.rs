use crate::{ExecutionOutcome, VertexId, VertexStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during graph execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        graph_id: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowFinished {
        execution_id: ExecutionId,
        outcome: ExecutionOutcome,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StatusChange {
        execution_id: ExecutionId,
        vertex_id: VertexId,
        status: VertexStatus,
        timestamp: DateTime<Utc>,
    },
    /// Visible model output. Never carries tool-call fragments.
    ContentChunk {
        execution_id: ExecutionId,
        vertex_id: VertexId,
        text: String,
        timestamp: DateTime<Utc>,
    },
    ToolCall {
        execution_id: ExecutionId,
        vertex_id: VertexId,
        call_id: String,
        name: String,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },
    Error {
        execution_id: ExecutionId,
        vertex_id: VertexId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::WorkflowStarted { execution_id, .. }
            | ExecutionEvent::WorkflowFinished { execution_id, .. }
            | ExecutionEvent::StatusChange { execution_id, .. }
            | ExecutionEvent::ContentChunk { execution_id, .. }
            | ExecutionEvent::ToolCall { execution_id, .. }
            | ExecutionEvent::Error { execution_id, .. } => *execution_id,
        }
    }

    pub fn vertex_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::StatusChange { vertex_id, .. }
            | ExecutionEvent::ContentChunk { vertex_id, .. }
            | ExecutionEvent::ToolCall { vertex_id, .. }
            | ExecutionEvent::Error { vertex_id, .. } => Some(vertex_id),
            _ => None,
        }
    }

    fn reattribute(self, group: &str) -> Option<ExecutionEvent> {
        match self {
            ExecutionEvent::ContentChunk {
                execution_id,
                text,
                timestamp,
                ..
            } => Some(ExecutionEvent::ContentChunk {
                execution_id,
                vertex_id: group.to_string(),
                text,
                timestamp,
            }),
            ExecutionEvent::ToolCall {
                execution_id,
                call_id,
                name,
                is_error,
                timestamp,
                ..
            } => Some(ExecutionEvent::ToolCall {
                execution_id,
                vertex_id: group.to_string(),
                call_id,
                name,
                is_error,
                timestamp,
            }),
            ExecutionEvent::Error {
                execution_id,
                message,
                timestamp,
                ..
            } => Some(ExecutionEvent::Error {
                execution_id,
                vertex_id: group.to_string(),
                message,
                timestamp,
            }),
            _ => None,
        }
    }
}

/// Where events go: the shared broadcast bus plus, optionally, the
/// per-execution stream of one caller.
#[derive(Clone)]
pub struct EventSink {
    bus: broadcast::Sender<ExecutionEvent>,
    stream: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    attribute_to: Option<VertexId>,
}

impl EventSink {
    pub fn new(bus: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            bus,
            stream: None,
            attribute_to: None,
        }
    }

    pub fn with_stream(mut self, stream: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Sink for the inner graph of a group. Chunk, tool-call and error events
    /// are re-attributed to the group vertex; lifecycle events stay internal.
    /// Nested groups keep the outermost attribution.
    pub fn scoped(&self, vertex_id: &str) -> Self {
        Self {
            bus: self.bus.clone(),
            stream: self.stream.clone(),
            attribute_to: Some(
                self.attribute_to
                    .clone()
                    .unwrap_or_else(|| vertex_id.to_string()),
            ),
        }
    }

    pub fn send(&self, event: ExecutionEvent) {
        let event = match &self.attribute_to {
            None => event,
            Some(group) => {
                let inner_vertex = event.vertex_id().map(str::to_string);
                match event.reattribute(group) {
                    Some(event) => event,
                    None => {
                        tracing::debug!(group = %group, vertex = ?inner_vertex, "Inner lifecycle event kept internal");
                        return;
                    }
                }
            }
        };
        if let Some(stream) = self.stream.as_ref().filter(|s| !s.is_closed()) {
            let _ = stream.send(event.clone());
        }
        let _ = self.bus.send(event);
    }
}

/// Event emitter for vertices to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    vertex_id: VertexId,
    sink: EventSink,
}

impl EventEmitter {
    pub fn new(execution_id: ExecutionId, vertex_id: impl Into<String>, sink: EventSink) -> Self {
        Self {
            execution_id,
            vertex_id: vertex_id.into(),
            sink,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn vertex_id(&self) -> &str {
        &self.vertex_id
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Emit a chunk of visible content
    pub fn content(&self, text: impl Into<String>) {
        self.sink.send(ExecutionEvent::ContentChunk {
            execution_id: self.execution_id,
            vertex_id: self.vertex_id.clone(),
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn tool_call(&self, call_id: impl Into<String>, name: impl Into<String>, is_error: bool) {
        self.sink.send(ExecutionEvent::ToolCall {
            execution_id: self.execution_id,
            vertex_id: self.vertex_id.clone(),
            call_id: call_id.into(),
            name: name.into(),
            is_error,
            timestamp: Utc::now(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.sink.send(ExecutionEvent::Error {
            execution_id: self.execution_id,
            vertex_id: self.vertex_id.clone(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn status(&self, status: VertexStatus) {
        self.sink.send(ExecutionEvent::StatusChange {
            execution_id: self.execution_id,
            vertex_id: self.vertex_id.clone(),
            status,
            timestamp: Utc::now(),
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn sink(&self) -> EventSink {
        EventSink::new(self.sender.clone())
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, vertex_id: impl Into<String>) -> EventEmitter {
        EventEmitter::new(execution_id, vertex_id, self.sink())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scoped_sink_reattributes_and_filters() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        let inner = EventEmitter::new(id, "inner_llm", bus.sink().scoped("group").scoped("nested"));

        inner.status(VertexStatus::Running);
        inner.content("hi");

        match rx.recv().await.unwrap() {
            ExecutionEvent::ContentChunk { vertex_id, text, .. } => {
                assert_eq!(vertex_id, "group");
                assert_eq!(text, "hi");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_stream_still_reaches_bus() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let (tx, mut stream) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(Uuid::new_v4(), "llm", bus.sink().with_stream(tx));

        emitter.content("first");
        assert!(matches!(stream.try_recv(), Ok(ExecutionEvent::ContentChunk { .. })));
        drop(stream);
        emitter.content("second");

        assert!(rx.try_recv().is_ok());
        match rx.try_recv().unwrap() {
            ExecutionEvent::ContentChunk { text, .. } => assert_eq!(text, "second"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = ExecutionEvent::StatusChange {
            execution_id: Uuid::nil(),
            vertex_id: "a".into(),
            status: VertexStatus::Failed {
                reason: "boom".into(),
            },
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["status"]["state"], "failed");
    }
}
