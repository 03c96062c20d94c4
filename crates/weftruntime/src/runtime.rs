use crate::graph::{ExecuteOptions, ExecutionResult, ExecutionStream, Graph};
use crate::registry::ToolRegistry;
use crate::services::Services;
use crate::tool_manager::ToolPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use weftcore::{EventBus, ExecutionEvent, GraphDefinition, GraphError, ModelService, RetryPolicy, Value};

/// Main runtime for building and executing graphs
pub struct WeftRuntime {
    services: Services,
    event_bus: Arc<EventBus>,
    graphs: Arc<RwLock<HashMap<String, Graph>>>,
}

impl WeftRuntime {
    /// Create a runtime with an empty tool registry and default settings
    pub fn new(model: Arc<dyn ModelService>) -> Self {
        Self::with_registry(model, Arc::new(ToolRegistry::new()), RuntimeConfig::default())
    }

    /// Create a runtime with a pre-configured tool registry
    pub fn with_registry(model: Arc<dyn ModelService>, tools: Arc<ToolRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            services: Services::new(model, tools).with_config(config),
            event_bus,
            graphs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.services.tools
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.services.config
    }

    /// Validate and compile a definition
    pub fn build(&self, definition: &GraphDefinition) -> Result<Graph, GraphError> {
        Graph::build(definition, &self.services)
    }

    /// Build a graph and keep it for later execution by id
    pub async fn register_graph(&self, definition: &GraphDefinition) -> Result<String, GraphError> {
        let graph = self.build(definition)?;
        let id = graph.id().to_string();
        self.graphs.write().await.insert(id.clone(), graph);
        Ok(id)
    }

    /// Execute a registered graph by id
    pub async fn execute_graph(
        &self,
        graph_id: &str,
        inputs: HashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, GraphError> {
        let graph = self
            .graphs
            .read()
            .await
            .get(graph_id)
            .cloned()
            .ok_or_else(|| GraphError::Execution(format!("graph '{}' is not registered", graph_id)))?;
        graph.execute(inputs, self.with_bus(options)).await
    }

    /// Build and execute a definition directly (without registration)
    pub async fn execute(
        &self,
        definition: &GraphDefinition,
        inputs: HashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, GraphError> {
        self.build(definition)?.execute(inputs, self.with_bus(options)).await
    }

    /// Build and execute a definition, streaming its events
    pub fn execute_stream(
        &self,
        definition: &GraphDefinition,
        inputs: HashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Result<ExecutionStream, GraphError> {
        Ok(self.build(definition)?.execute_stream(inputs, self.with_bus(options)))
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn with_bus(&self, options: ExecuteOptions) -> ExecuteOptions {
        match options.events {
            Some(_) => options,
            None => options.with_events(self.event_bus.sink()),
        }
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_vertices: usize,
    pub event_buffer_size: usize,
    /// Round cap for language-model vertices that do not set their own
    pub default_max_rounds: u32,
    pub tool_policy: ToolPolicy,
    /// Retry policy for vertices without one
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_vertices: 10,
            event_buffer_size: 1000,
            default_max_rounds: 8,
            tool_policy: ToolPolicy::Sequential,
            retry: RetryPolicy::default(),
        }
    }
}
