use crate::registry::ToolRegistry;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weftcore::{EventEmitter, ExecutionId, Tool, ToolCall, ToolContext, ToolError, ToolResult};

/// How a batch of tool calls from one model round is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPolicy {
    /// One call at a time, in the order the model issued them
    #[default]
    Sequential,
    /// Calls run together when every tool in the batch is independent
    Concurrent,
}

/// Executes tool calls against the registry. Failures never escape as
/// errors: each becomes an error result the model can read.
#[derive(Clone)]
pub struct ToolManager {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
}

impl ToolManager {
    pub fn new(registry: Arc<ToolRegistry>, policy: ToolPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch. Results come back in the order of `calls`.
    pub async fn execute(
        &self,
        calls: &[ToolCall],
        events: &EventEmitter,
        cancellation: &CancellationToken,
    ) -> Vec<ToolResult> {
        let concurrent = self.policy == ToolPolicy::Concurrent
            && calls.len() > 1
            && calls
                .iter()
                .all(|call| self.registry.get(&call.name).is_some_and(|t| t.independent()));

        let results = if concurrent {
            tracing::debug!("Running {} tool calls concurrently", calls.len());
            join_all(
                calls
                    .iter()
                    .map(|call| self.execute_one(call, events.execution_id(), events.vertex_id(), cancellation)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(
                    self.execute_one(call, events.execution_id(), events.vertex_id(), cancellation)
                        .await,
                );
            }
            results
        };

        for result in &results {
            events.tool_call(result.call_id.clone(), result.name.clone(), result.is_error);
        }
        results
    }

    async fn execute_one(
        &self,
        call: &ToolCall,
        execution_id: ExecutionId,
        vertex_id: &str,
        cancellation: &CancellationToken,
    ) -> ToolResult {
        if cancellation.is_cancelled() {
            return ToolResult::error(call, ToolError::Cancelled.to_string());
        }
        let tool = match self.registry.get(&call.name) {
            Some(tool) => tool,
            None => {
                tracing::warn!("Model requested unknown tool: {}", call.name);
                return ToolResult::error(call, ToolError::NotFound(call.name.clone()).to_string());
            }
        };
        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::error(call, ToolError::InvalidArguments(e.to_string()).to_string())
            }
        };

        let ctx = ToolContext {
            execution_id,
            vertex_id: vertex_id.to_string(),
            call_id: call.id.clone(),
            cancellation: cancellation.child_token(),
        };
        match invoke(tool.as_ref(), args, ctx).await {
            Ok(output) => ToolResult::ok(call, output),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", call.name, e);
                ToolResult::error(call, e.to_string())
            }
        }
    }
}

/// Call a tool under its own timeout, observing cancellation.
pub async fn invoke(
    tool: &dyn Tool,
    args: serde_json::Value,
    ctx: ToolContext,
) -> Result<serde_json::Value, ToolError> {
    let cancellation = ctx.cancellation.clone();
    let call = async {
        match tool.timeout_secs() {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), tool.call(args, ctx))
                .await
                .unwrap_or(Err(ToolError::Timeout { seconds })),
            None => tool.call(args, ctx).await,
        }
    };
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(ToolError::Cancelled),
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::broadcast;
    use uuid::Uuid;
    use weftcore::EventSink;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase the text argument"
        }

        async fn call(&self, args: serde_json::Value, _ctx: ToolContext) -> Result<serde_json::Value, ToolError> {
            let text = args["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
            Ok(json!(text.to_uppercase()))
        }

        fn independent(&self) -> bool {
            true
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        async fn call(&self, _args: serde_json::Value, _ctx: ToolContext) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        }

        fn timeout_secs(&self) -> Option<u64> {
            Some(1)
        }
    }

    fn manager(policy: ToolPolicy) -> ToolManager {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Upper));
        registry.register(Arc::new(Slow));
        ToolManager::new(Arc::new(registry), policy)
    }

    fn emitter() -> (EventEmitter, broadcast::Receiver<weftcore::ExecutionEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (EventEmitter::new(Uuid::new_v4(), "llm", EventSink::new(tx)), rx)
    }

    #[tokio::test]
    async fn results_follow_call_order_and_errors_become_results() {
        let (events, mut rx) = emitter();
        let calls = vec![
            ToolCall::new("a", "upper", r#"{"text":"hi"}"#),
            ToolCall::new("b", "missing", "{}"),
            ToolCall::new("c", "upper", "{not json"),
            ToolCall::new("d", "upper", "{}"),
        ];
        let results = manager(ToolPolicy::Concurrent)
            .execute(&calls, &events, &CancellationToken::new())
            .await;

        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(results[0].output, json!("HI"));
        assert!(!results[0].is_error);
        assert!(results[1..].iter().all(|r| r.is_error));
        assert!(results[1].content().contains("missing"));

        let mut announced = 0;
        while rx.try_recv().is_ok() {
            announced += 1;
        }
        assert_eq!(announced, 4);
    }

    #[tokio::test]
    async fn timeout_becomes_error_result() {
        let (events, _rx) = emitter();
        let calls = vec![ToolCall::new("t", "slow", "")];
        let results = manager(ToolPolicy::Sequential)
            .execute(&calls, &events, &CancellationToken::new())
            .await;
        assert!(results[0].is_error);
        assert!(results[0].content().contains("Timeout"));
    }

    #[tokio::test]
    async fn cancelled_batch_reports_cancelled_results() {
        let (events, _rx) = emitter();
        let token = CancellationToken::new();
        token.cancel();
        let calls = vec![ToolCall::new("a", "upper", r#"{"text":"x"}"#)];
        let results = manager(ToolPolicy::Sequential).execute(&calls, &events, &token).await;
        assert!(results[0].is_error);
    }
}
