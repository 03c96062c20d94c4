#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weftcore::{
    response_into_deltas, ModelDelta, ModelRequest, ModelResponse, ModelService, ModelStream,
    RetrievalRequest, RetrievedDocument, ServiceError, Tool, ToolCall, ToolContext, ToolError,
};
use weftruntime::{RuntimeConfig, Services, ToolRegistry};

/// One scripted model reply
#[derive(Clone)]
pub enum Script {
    Reply(ModelResponse),
    Deltas(Vec<ModelDelta>),
    Fail(ServiceError),
}

/// Model that replays a fixed script and records every request it sees.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    repeat_last: bool,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Keep replaying the final script once the others are used up
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &ModelRequest) -> Script {
        self.requests.lock().unwrap().push(request.clone());
        let mut scripts = self.scripts.lock().unwrap();
        if self.repeat_last && scripts.len() == 1 {
            return scripts[0].clone();
        }
        scripts
            .pop_front()
            .unwrap_or_else(|| Script::Fail(ServiceError::InvalidResponse("script exhausted".into())))
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn invoke_model(&self, request: &ModelRequest) -> Result<ModelResponse, ServiceError> {
        match self.next(request) {
            Script::Reply(response) => Ok(response),
            Script::Fail(e) => Err(e),
            Script::Deltas(_) => panic!("delta scripts are only for streaming calls"),
        }
    }

    async fn stream_model(&self, request: &ModelRequest) -> Result<ModelStream, ServiceError> {
        let deltas = match self.next(request) {
            Script::Reply(response) => response_into_deltas(response),
            Script::Deltas(deltas) => deltas,
            Script::Fail(e) => return Err(e),
        };
        Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
    }

    async fn invoke_retrieval(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<RetrievedDocument>, ServiceError> {
        Ok((0..request.top_k.min(2))
            .map(|i| RetrievedDocument {
                id: format!("doc-{}", i),
                content: format!("{} #{}", request.query, i),
                score: 1.0 - i as f64 * 0.1,
                metadata: Default::default(),
            })
            .collect())
    }
}

pub fn text(content: &str) -> Script {
    Script::Reply(ModelResponse::text(content))
}

pub fn calls(calls: &[(&str, &str, &str)]) -> Script {
    Script::Reply(ModelResponse::tool_calls(
        calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect(),
    ))
}

pub struct UpperTool;

#[async_trait]
impl Tool for UpperTool {
    fn name(&self) -> &str {
        "text.upper"
    }

    fn description(&self) -> &str {
        "Uppercase the `text` argument"
    }

    async fn call(&self, args: serde_json::Value, _ctx: ToolContext) -> Result<serde_json::Value, ToolError> {
        let text = args["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
        Ok(json!(text.to_uppercase()))
    }
}

pub struct IncrementTool;

#[async_trait]
impl Tool for IncrementTool {
    fn name(&self) -> &str {
        "math.increment"
    }

    fn description(&self) -> &str {
        "Add one to `value`"
    }

    async fn call(&self, args: serde_json::Value, _ctx: ToolContext) -> Result<serde_json::Value, ToolError> {
        let value = args["value"]
            .as_f64()
            .ok_or_else(|| ToolError::InvalidArguments("value must be a number".into()))?;
        Ok(json!(value + 1.0))
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "always.fail"
    }

    fn description(&self) -> &str {
        "Fails every call"
    }

    async fn call(&self, _args: serde_json::Value, _ctx: ToolContext) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed("boom".into()))
    }
}

pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "time.slow"
    }

    fn description(&self) -> &str {
        "Sleeps for ten seconds"
    }

    async fn call(&self, _args: serde_json::Value, _ctx: ToolContext) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!("late"))
    }
}

pub fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(UpperTool));
    registry.register(Arc::new(IncrementTool));
    registry.register(Arc::new(FailingTool));
    registry.register(Arc::new(SlowTool));
    Arc::new(registry)
}

pub fn services(model: Arc<ScriptedModel>) -> Services {
    let config = RuntimeConfig {
        retry: weftcore::RetryPolicy {
            max_attempts: 3,
            delay_ms: 1,
            backoff_multiplier: 1.0,
        },
        ..Default::default()
    };
    Services::new(model, registry()).with_config(config)
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}
