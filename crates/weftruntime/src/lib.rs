//! Graph execution runtime
//!
//! This crate validates graph definitions, compiles their vertices and runs
//! them: the scheduler dispatches ready vertices in parallel, the
//! language-model vertex drives multi-round tool calling, and the tool
//! registry holds what models and function vertices may call.

mod graph;
mod registry;
pub mod retry;
mod runtime;
mod scheduler;
mod services;
mod tool_manager;
mod vertex;
pub mod vertices;

pub use graph::{ExecuteOptions, ExecutionResult, ExecutionStream, Graph, VertexReport};
pub use registry::ToolRegistry;
pub use runtime::{RuntimeConfig, WeftRuntime};
pub use services::Services;
pub use tool_manager::{ToolManager, ToolPolicy};
pub use vertex::{Vertex, VertexContext, VertexOutput};
