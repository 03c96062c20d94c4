//! Boundary to model, embedding and retrieval backends.
//!
//! Concrete provider clients live outside the engine; graphs receive an
//! `Arc<dyn ModelService>` at build time.

use crate::{Message, ServiceError, ToolCall, ToolDefinition};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub parameters: ModelParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A complete (non-streamed) model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        }
    }
}

/// A fragment of a tool call in a streamed reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One item of a streamed model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    Content(String),
    ToolCall(ToolCallDelta),
    /// The call at `index` (or with `id`) is complete.
    ToolCallEnd {
        index: Option<usize>,
        id: Option<String>,
    },
    Usage(Usage),
    /// End of the reply; completes every open tool call.
    Finish(FinishReason),
}

pub type ModelStream = BoxStream<'static, Result<ModelDelta, ServiceError>>;

/// Replay a whole response as a delta sequence.
pub fn response_into_deltas(response: ModelResponse) -> Vec<ModelDelta> {
    let mut deltas = Vec::new();
    if !response.content.is_empty() {
        deltas.push(ModelDelta::Content(response.content));
    }
    for (index, call) in response.tool_calls.into_iter().enumerate() {
        deltas.push(ModelDelta::ToolCall(ToolCallDelta {
            index: Some(index),
            id: Some(call.id),
            name: Some(call.name),
            arguments: Some(call.arguments),
        }));
    }
    if let Some(usage) = response.usage {
        deltas.push(ModelDelta::Usage(usage));
    }
    deltas.push(ModelDelta::Finish(response.finish_reason));
    deltas
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub dataset_ids: Vec<String>,
    pub top_k: usize,
    pub score_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Whole-response model call.
    async fn invoke_model(&self, request: &ModelRequest) -> Result<ModelResponse, ServiceError>;

    /// Streaming model call. Defaults to replaying `invoke_model`.
    async fn stream_model(&self, request: &ModelRequest) -> Result<ModelStream, ServiceError> {
        let response = self.invoke_model(request).await?;
        Ok(stream::iter(response_into_deltas(response).into_iter().map(Ok)).boxed())
    }

    async fn invoke_embedding(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::Unsupported(format!(
            "embedding model '{}'",
            request.model
        )))
    }

    async fn invoke_retrieval(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<RetrievedDocument>, ServiceError> {
        let _ = request;
        Err(ServiceError::Unsupported("retrieval".to_string()))
    }
}
