use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weftcore::{
    FunctionConfig, GraphDefinition, ModelRequest, ModelResponse, ModelService, ServiceError, Tool,
    ToolContext, ToolError, ToolParameter, Value, VariableBinding, VertexKind, VertexSpec,
};
use weftruntime::{ExecuteOptions, RuntimeConfig, ToolRegistry, WeftRuntime};
use wefttools::{DelayTool, EchoTool, HttpRequestTool, JsonParseTool, JsonStringifyTool};

// Helper function to create a tool context
fn create_test_context() -> ToolContext {
    ToolContext {
        execution_id: uuid::Uuid::new_v4(),
        vertex_id: "test".to_string(),
        call_id: "call_0".to_string(),
        cancellation: CancellationToken::new(),
    }
}

struct NoModel;

#[async_trait]
impl ModelService for NoModel {
    async fn invoke_model(&self, _request: &ModelRequest) -> Result<ModelResponse, ServiceError> {
        Err(ServiceError::Unsupported("no model in tool tests".to_string()))
    }
}

#[test]
fn test_register_all() {
    let mut registry = ToolRegistry::new();
    wefttools::register_all(&mut registry);

    assert_eq!(
        registry.list_tools(),
        vec!["debug.echo", "http.request", "json.parse", "json.stringify", "time.delay"]
    );
    let definitions = registry.definitions(&["http.request".to_string()]);
    assert_eq!(definitions[0].parameters["required"], json!(["url"]));
}

#[tokio::test]
async fn test_json_parse() {
    let result = JsonParseTool
        .call(json!({ "json": r#"{"a":[1,2]}"# }), create_test_context())
        .await
        .unwrap();
    assert_eq!(result, json!({ "a": [1, 2] }));

    let err = JsonParseTool
        .call(json!({ "json": "{not json" }), create_test_context())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ExecutionFailed(_)), "Malformed input should fail");

    let err = JsonParseTool.call(json!({}), create_test_context()).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));
}

#[tokio::test]
async fn test_json_stringify() {
    let result = JsonStringifyTool
        .call(json!({ "value": { "k": true } }), create_test_context())
        .await
        .unwrap();
    assert_eq!(result, json!(r#"{"k":true}"#));

    let pretty = JsonStringifyTool
        .call(json!({ "value": [1], "pretty": true }), create_test_context())
        .await
        .unwrap();
    assert!(pretty.as_str().unwrap().contains('\n'));
}

#[tokio::test]
async fn test_echo_returns_arguments() {
    let args = json!({ "message": "hi", "n": 3 });
    let result = EchoTool.call(args.clone(), create_test_context()).await.unwrap();
    assert_eq!(result, args);
}

#[tokio::test]
async fn test_delay_waits_and_passes_value() {
    let started = std::time::Instant::now();
    let result = DelayTool
        .call(json!({ "delay_ms": 20, "value": "done" }), create_test_context())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(result, json!("done"));
}

#[tokio::test]
async fn test_delay_observes_cancellation() {
    let ctx = create_test_context();
    let token = ctx.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = DelayTool.call(json!({ "delay_ms": 10_000 }), ctx).await.unwrap_err();
    assert_eq!(err, ToolError::Cancelled);
}

#[tokio::test]
async fn test_http_rejects_bad_arguments() {
    let tool = HttpRequestTool::new();
    let err = tool.call(json!({}), create_test_context()).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));

    let err = tool
        .call(json!({ "url": "http://localhost", "method": "TRACE" }), create_test_context())
        .await
        .unwrap_err();
    assert_eq!(err, ToolError::InvalidArguments("Unsupported method: TRACE".to_string()));
    assert_eq!(tool.timeout_secs(), Some(30));
}

#[tokio::test]
async fn test_function_vertex_calls_registered_tool() {
    let mut registry = ToolRegistry::new();
    wefttools::register_all(&mut registry);
    let runtime = WeftRuntime::with_registry(Arc::new(NoModel), Arc::new(registry), RuntimeConfig::default());

    let mut def = GraphDefinition::new("parse");
    def.add_vertex(VertexSpec::source("start", &["payload"]));
    def.add_vertex(VertexSpec::new(
        "parse",
        VertexKind::Function(
            FunctionConfig {
                tool_name: "json.parse".to_string(),
                tool_parameters: Default::default(),
            }
            .with_parameter("json", ToolParameter::variable(&["start", "payload"])),
        ),
    ));
    def.add_vertex(VertexSpec::sink(
        "end",
        vec![VariableBinding::selector("name", &["parse", "result", "name"])],
    ));
    def.connect("start", "parse");
    def.connect("parse", "end");

    let inputs = HashMap::from([("payload".to_string(), Value::from(r#"{"name":"weft"}"#))]);
    let result = runtime.execute(&def, inputs, ExecuteOptions::default()).await.unwrap();

    assert!(result.is_success(), "{:?}", result.outcome);
    assert_eq!(result.outputs.get("name"), Some(&Value::from("weft")));
}
