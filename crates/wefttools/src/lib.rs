//! Standard tool library
//!
//! Built-in tools that function vertices and language models can call

mod debug;
mod http;
mod time;
mod transform;

pub use debug::EchoTool;
pub use http::HttpRequestTool;
pub use time::DelayTool;
pub use transform::{JsonParseTool, JsonStringifyTool};
use weftruntime::ToolRegistry;

use std::sync::Arc;

/// Register all standard tools with a registry
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(debug::EchoTool));
    registry.register(Arc::new(http::HttpRequestTool::new()));
    registry.register(Arc::new(transform::JsonParseTool));
    registry.register(Arc::new(transform::JsonStringifyTool));
    registry.register(Arc::new(time::DelayTool));
}
