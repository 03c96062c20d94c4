use crate::retry;
use crate::services::Services;
use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use std::sync::Arc;
use weftcore::{
    EmbeddingConfig, EmbeddingRequest, ModelService, RetryPolicy, ServiceError, Value, VertexError,
    VertexSpec,
};

/// Embeds one rendered input with the configured model
pub struct EmbeddingVertex {
    config: EmbeddingConfig,
    model: Arc<dyn ModelService>,
    retry: RetryPolicy,
}

impl EmbeddingVertex {
    pub fn new(spec: &VertexSpec, config: EmbeddingConfig, services: &Services) -> Self {
        Self {
            model: services.model.clone(),
            retry: spec.retry_policy.clone().unwrap_or_else(|| services.config.retry.clone()),
            config,
        }
    }
}

#[async_trait]
impl Vertex for EmbeddingVertex {
    fn kind(&self) -> &str {
        "embedding"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            inputs: vec![ctx.resolver().resolve(&self.config.input)?.to_text()],
        };

        let vectors = retry::call_with_retry(&self.retry, &ctx.cancellation, "embedding", || {
            self.model.invoke_embedding(&request)
        })
        .await?;
        let vector = vectors.into_iter().next().ok_or_else(|| {
            VertexError::ModelCall(ServiceError::InvalidResponse("no embedding returned".to_string()))
        })?;

        Ok(VertexOutput::new()
            .with_output("dimensions", vector.len())
            .with_output(
                "embedding",
                Value::Array(vector.into_iter().map(|x| Value::Number(x as f64)).collect()),
            ))
    }
}
