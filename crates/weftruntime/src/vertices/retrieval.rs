use crate::retry;
use crate::services::Services;
use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use std::sync::Arc;
use weftcore::{
    ModelService, RetrievalConfig, RetrievalRequest, RetryPolicy, ValidationError, Value,
    VertexError, VertexSpec,
};

/// Queries the knowledge bases named in its configuration
pub struct RetrievalVertex {
    config: RetrievalConfig,
    query: String,
    model: Arc<dyn ModelService>,
    retry: RetryPolicy,
}

impl RetrievalVertex {
    pub fn new(spec: &VertexSpec, config: RetrievalConfig, services: &Services) -> Result<Self, ValidationError> {
        let query = config.query_template().ok_or_else(|| ValidationError::InvalidConfig {
            vertex: spec.id.clone(),
            reason: "retrieval needs a query or query_variable_selector".to_string(),
        })?;
        Ok(Self {
            query,
            model: services.model.clone(),
            retry: spec.retry_policy.clone().unwrap_or_else(|| services.config.retry.clone()),
            config,
        })
    }
}

#[async_trait]
impl Vertex for RetrievalVertex {
    fn kind(&self) -> &str {
        "knowledge-retrieval"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let request = RetrievalRequest {
            query: ctx.resolver().resolve(&self.query)?.to_text(),
            dataset_ids: self.config.dataset_ids.clone(),
            top_k: self.config.top_k,
            score_threshold: self.config.score_threshold,
        };

        let documents = retry::call_with_retry(&self.retry, &ctx.cancellation, "retrieval", || {
            self.model.invoke_retrieval(&request)
        })
        .await?;
        tracing::debug!("Retrieval {} returned {} documents", ctx.vertex_id, documents.len());

        let result = serde_json::to_value(&documents)
            .map(Value::from)
            .map_err(|e| VertexError::ExecutionFailed(e.to_string()))?;
        Ok(VertexOutput::new()
            .with_output("count", documents.len())
            .with_output("result", result))
    }
}
