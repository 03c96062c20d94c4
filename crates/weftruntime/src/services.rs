use crate::registry::ToolRegistry;
use crate::runtime::RuntimeConfig;
use crate::tool_manager::ToolManager;
use std::sync::Arc;
use weftcore::ModelService;

/// Backends a graph is built against.
#[derive(Clone)]
pub struct Services {
    pub model: Arc<dyn ModelService>,
    pub tools: Arc<ToolRegistry>,
    pub config: RuntimeConfig,
}

impl Services {
    pub fn new(model: Arc<dyn ModelService>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tool_manager(&self) -> ToolManager {
        ToolManager::new(self.tools.clone(), self.config.tool_policy)
    }
}
