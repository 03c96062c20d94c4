mod common;

use common::{init_tracing, services, text, ScriptedModel};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weftcore::{
    ConditionCase, EdgeSpec, ExecutionOutcome, FunctionConfig, GraphDefinition, GraphError,
    GroupConfig, LoopConfig, ToolParameter, ValidationError, Value, VariableBinding, VertexKind,
    VertexSpec, VertexStatus,
};
use weftruntime::{ExecuteOptions, Graph};

fn inputs(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

fn build(def: &GraphDefinition) -> Result<Graph, GraphError> {
    Graph::build(def, &services(Arc::new(ScriptedModel::new(vec![text("unused")]))))
}

fn validation_error(def: &GraphDefinition) -> ValidationError {
    match build(def) {
        Err(GraphError::Validation(e)) => e,
        Err(other) => panic!("expected a validation error, got {}", other),
        Ok(_) => panic!("expected a validation error"),
    }
}

fn greeting_graph() -> GraphDefinition {
    let mut def = GraphDefinition::new("greeting");
    def.add_vertex(VertexSpec::source("start", &["name"]));
    def.add_vertex(VertexSpec::template("greet", "Hello, {{#start.name#}}!"));
    def.add_vertex(VertexSpec::sink(
        "end",
        vec![VariableBinding::selector("message", &["greet", "output"])],
    ));
    def.connect("start", "greet");
    def.connect("greet", "end");
    def
}

#[tokio::test]
async fn test_linear_graph_runs_in_topological_order() {
    init_tracing();
    let graph = build(&greeting_graph()).unwrap();
    assert_eq!(graph.topological_order(), vec!["start", "greet", "end"]);

    let result = graph
        .execute(inputs(&[("name", "Ada")]), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.outcome, ExecutionOutcome::Completed);
    assert_eq!(result.order, vec!["start", "greet", "end"]);
    assert_eq!(result.outputs.get("message"), Some(&Value::from("Hello, Ada!")));
    assert!(result.vertices.values().all(|r| r.status == VertexStatus::Completed));
}

#[tokio::test]
async fn test_fan_out_and_join() {
    let mut def = GraphDefinition::new("fan");
    def.add_vertex(VertexSpec::source("start", &["name"]));
    def.add_vertex(VertexSpec::template("a", "A:{{#start.name#}}"));
    def.add_vertex(VertexSpec::template("b", "B:{{#start.name#}}"));
    def.add_vertex(VertexSpec::answer("end", "{{#a.output#}} {{#b.output#}}"));
    def.connect("start", "a");
    def.connect("start", "b");
    def.connect("a", "end");
    def.connect("b", "end");

    let result = build(&def)
        .unwrap()
        .execute(inputs(&[("name", "x")]), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.order.first().map(String::as_str), Some("start"));
    assert_eq!(result.order.last().map(String::as_str), Some("end"));
    assert_eq!(result.outputs.get("answer"), Some(&Value::from("A:x B:x")));
}

#[tokio::test]
async fn test_ports_carry_upstream_fields() {
    let mut def = GraphDefinition::new("ports");
    def.add_vertex(VertexSpec::source("start", &["name"]));
    def.add_vertex(VertexSpec::template("greet", "Hi {{ who }} from {{ place }}").with_port("who").with_port_default("place", "home"));
    def.add_vertex(VertexSpec::sink(
        "end",
        vec![VariableBinding::selector("message", &["greet", "output"])],
    ));
    def.connect_ports("start", "name", "greet", "who");
    def.connect("greet", "end");

    let result = build(&def)
        .unwrap()
        .execute(inputs(&[("name", "Bo")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.outputs.get("message"), Some(&Value::from("Hi Bo from home")));
}

fn routing_graph() -> GraphDefinition {
    let mut def = GraphDefinition::new("routing");
    def.add_vertex(VertexSpec::source("start", &["q"]));
    def.add_vertex(VertexSpec::condition(
        "route",
        vec![ConditionCase::expression("rusty", "{{#start.q#}} contains 'rust'")],
    ));
    def.add_vertex(VertexSpec::answer("yes", "about rust"));
    def.add_vertex(VertexSpec::answer("no", "something else"));
    def.connect_branch("route", "rusty", "yes");
    def.connect_branch("route", "false", "no");
    def.connect("start", "route");
    def
}

#[tokio::test]
async fn test_condition_activates_exactly_one_branch() {
    let graph = build(&routing_graph()).unwrap();

    let result = graph
        .execute(inputs(&[("q", "I like rust")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status("yes"), Some(&VertexStatus::Completed));
    assert_eq!(result.status("no"), Some(&VertexStatus::Skipped));
    assert_eq!(result.output("route", "selected_case"), Some(&Value::from("rusty")));
    assert_eq!(result.outputs.get("answer"), Some(&Value::from("about rust")));

    let result = graph
        .execute(inputs(&[("q", "I like go")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status("yes"), Some(&VertexStatus::Skipped));
    assert_eq!(result.status("no"), Some(&VertexStatus::Completed));
    assert!(result.is_success());
}

#[tokio::test]
async fn test_skips_propagate_through_inactive_branches() {
    let mut def = routing_graph();
    def.add_vertex(VertexSpec::template("after_yes", "{{#yes.answer#}}"));
    def.add_vertex(VertexSpec::answer("tail", "{{#after_yes.output#}}"));
    def.connect("yes", "after_yes");
    def.connect("after_yes", "tail");

    let result = build(&def)
        .unwrap()
        .execute(inputs(&[("q", "plain")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status("after_yes"), Some(&VertexStatus::Skipped));
    assert_eq!(result.status("tail"), Some(&VertexStatus::Skipped));
    assert!(result.is_success(), "the 'no' sink completed");
}

#[tokio::test]
async fn test_join_after_condition_reads_skipped_branch_as_empty() {
    let mut def = GraphDefinition::new("join");
    def.add_vertex(VertexSpec::source("start", &["q"]));
    def.add_vertex(VertexSpec::condition(
        "route",
        vec![ConditionCase::expression("rusty", "{{#start.q#}} contains 'rust'")],
    ));
    def.add_vertex(VertexSpec::template("a", "A:{{#start.q#}}"));
    def.add_vertex(VertexSpec::template("b", "B:{{#start.q#}}"));
    def.add_vertex(VertexSpec::answer("end", "[{{#a.output#}}{{#b.output#}}]"));
    def.connect("start", "route");
    def.connect_branch("route", "rusty", "a");
    def.connect_branch("route", "false", "b");
    def.connect("a", "end");
    def.connect("b", "end");
    let graph = build(&def).unwrap();

    let result = graph
        .execute(inputs(&[("q", "rust")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.outcome);
    assert_eq!(result.status("a"), Some(&VertexStatus::Completed));
    assert_eq!(result.status("b"), Some(&VertexStatus::Skipped));
    assert_eq!(result.status("end"), Some(&VertexStatus::Completed));
    assert_eq!(result.outputs.get("answer"), Some(&Value::from("[A:rust]")));

    let result = graph
        .execute(inputs(&[("q", "go")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.status("a"), Some(&VertexStatus::Skipped));
    assert_eq!(result.outputs.get("answer"), Some(&Value::from("[B:go]")));
}

#[tokio::test]
async fn test_failure_marks_downstream_failed() {
    let mut def = GraphDefinition::new("failing");
    def.add_vertex(VertexSpec::source("start", &[]));
    def.add_vertex(VertexSpec::function("explode", "always.fail"));
    def.add_vertex(VertexSpec::template("after", "{{#explode.text#}}"));
    def.add_vertex(VertexSpec::answer("end", "{{#after.output#}}"));
    def.connect("start", "explode");
    def.connect("explode", "after");
    def.connect("after", "end");

    let result = build(&def)
        .unwrap()
        .execute(HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert!(matches!(result.status("explode"), Some(VertexStatus::Failed { reason }) if reason.contains("boom")));
    assert_eq!(
        result.status("after"),
        Some(&VertexStatus::Failed {
            reason: "upstream vertex 'explode' failed".to_string()
        })
    );
    assert!(matches!(result.outcome, ExecutionOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_missing_output_field_aborts_execution() {
    let mut def = GraphDefinition::new("missing");
    def.add_vertex(VertexSpec::source("start", &["q"]));
    def.add_vertex(VertexSpec::template("t", "{{#start.nope#}}"));
    def.add_vertex(VertexSpec::answer("end", "{{#t.output#}}"));
    def.connect("start", "t");
    def.connect("t", "end");

    let err = build(&def)
        .unwrap()
        .execute(inputs(&[("q", "x")]), ExecuteOptions::default())
        .await
        .unwrap_err();
    match err {
        GraphError::Resolution { vertex, .. } => assert_eq!(vertex, "t"),
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test]
async fn test_required_source_variable() {
    let mut def = greeting_graph();
    if let VertexKind::Source(config) = &mut def.vertices[0].kind {
        config.variables[0].required = true;
    }
    let result = build(&def)
        .unwrap()
        .execute(HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();
    assert!(matches!(result.status("start"), Some(VertexStatus::Failed { .. })));
    assert!(!result.is_success());
}

#[tokio::test]
async fn test_cancellation_stops_running_vertices() {
    let mut def = GraphDefinition::new("slow");
    def.add_vertex(VertexSpec::source("start", &[]));
    def.add_vertex(VertexSpec::function("wait", "time.slow"));
    def.add_vertex(VertexSpec::answer("end", "{{#wait.text#}}"));
    def.connect("start", "wait");
    def.connect("wait", "end");

    let token = CancellationToken::new();
    let graph = build(&def).unwrap();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let result = graph
        .execute(HashMap::new(), ExecuteOptions::default().with_cancellation(token))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.outcome, ExecutionOutcome::Cancelled);
    assert_eq!(result.status("start"), Some(&VertexStatus::Completed));
    assert_eq!(result.status("wait"), Some(&VertexStatus::Cancelled));
    assert_eq!(result.status("end"), Some(&VertexStatus::Pending));
}

#[tokio::test]
async fn test_vertex_timeout() {
    let mut def = GraphDefinition::new("timeout");
    def.settings.vertex_timeout_ms = Some(50);
    def.add_vertex(VertexSpec::source("start", &[]));
    def.add_vertex(VertexSpec::function("wait", "time.slow"));
    def.add_vertex(VertexSpec::answer("end", "{{#wait.text#}}"));
    def.connect("start", "wait");
    def.connect("wait", "end");

    let result = build(&def)
        .unwrap()
        .execute(HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();
    assert!(matches!(result.status("wait"), Some(VertexStatus::Failed { reason }) if reason.contains("Timeout")));
}

fn counting_loop() -> GraphDefinition {
    let mut body = GraphDefinition::new("body");
    body.add_vertex(VertexSpec::source("iteration", &[]));
    body.add_vertex(VertexSpec::new(
        "inc",
        VertexKind::Function(
            FunctionConfig {
                tool_name: "math.increment".to_string(),
                tool_parameters: Default::default(),
            }
            .with_parameter("value", ToolParameter::variable(&["counter", "count"])),
        ),
    ));
    body.add_vertex(VertexSpec::sink(
        "next",
        vec![VariableBinding::selector("count", &["inc", "result"])],
    ));
    body.connect("iteration", "inc");
    body.connect("inc", "next");

    let mut def = GraphDefinition::new("counting");
    def.add_vertex(VertexSpec::source("start", &[]));
    def.add_vertex(VertexSpec::looping(
        "counter",
        LoopConfig::new(10, body)
            .with_variable("count", 0i64)
            .while_condition("count < 3"),
    ));
    def.add_vertex(VertexSpec::sink(
        "end",
        vec![
            VariableBinding::selector("count", &["counter", "count"]),
            VariableBinding::selector("iterations", &["counter", "iterations"]),
        ],
    ));
    def.connect("start", "counter");
    def.connect("counter", "end");
    def
}

#[tokio::test]
async fn test_loop_runs_until_condition_fails() {
    let result = build(&counting_loop())
        .unwrap()
        .execute(HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.outcome);
    assert_eq!(result.outputs.get("count"), Some(&Value::from(3i64)));
    assert_eq!(result.outputs.get("iterations"), Some(&Value::from(3u32)));
    assert!(!result.context.has_output("inc"), "inner outputs stay inside the loop");
}

#[tokio::test]
async fn test_loop_stops_at_its_bound() {
    let mut def = counting_loop();
    if let VertexKind::Loop(config) = &mut def.vertices[1].kind {
        config.max_iterations = 2;
    }
    let result = build(&def)
        .unwrap()
        .execute(HashMap::new(), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.outputs.get("iterations"), Some(&Value::from(2u32)));
    assert_eq!(result.outputs.get("count"), Some(&Value::from(2i64)));
}

#[tokio::test]
async fn test_group_publishes_only_declared_outputs() {
    let mut inner = GraphDefinition::new("inner");
    inner.add_vertex(VertexSpec::source("src", &["topic"]));
    inner.add_vertex(VertexSpec::template("fmt", "About {{#src.topic#}}"));
    inner.add_vertex(VertexSpec::sink(
        "out",
        vec![
            VariableBinding::selector("summary", &["fmt", "output"]),
            VariableBinding::selector("raw", &["src", "topic"]),
        ],
    ));
    inner.connect("src", "fmt");
    inner.connect("fmt", "out");

    let mut def = GraphDefinition::new("outer");
    def.add_vertex(VertexSpec::source("start", &["q"]));
    def.add_vertex(VertexSpec::group(
        "grp",
        GroupConfig {
            inputs: vec![VariableBinding::selector("topic", &["start", "q"])],
            outputs: vec!["summary".to_string()],
            graph: inner,
        },
    ));
    def.add_vertex(VertexSpec::answer("end", "{{#grp.summary#}}"));
    def.connect("start", "grp");
    def.connect("grp", "end");

    let result = build(&def)
        .unwrap()
        .execute(inputs(&[("q", "rust")]), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.outputs.get("answer"), Some(&Value::from("About rust")));
    let group_outputs = result.context.output("grp").unwrap();
    assert_eq!(group_outputs.len(), 1);
    assert!(!result.context.has_output("fmt"));
    assert!(!result.vertices.contains_key("fmt"));
}

#[tokio::test]
async fn test_retrieval_vertex() {
    let mut def = GraphDefinition::new("kb");
    def.add_vertex(VertexSpec::source("start", &["q"]));
    def.add_vertex(VertexSpec::new(
        "docs",
        VertexKind::Retrieval(
            serde_json::from_value(serde_json::json!({
                "query_variable_selector": ["start", "q"],
                "dataset_ids": ["kb1"],
                "top_k": 2
            }))
            .unwrap(),
        ),
    ));
    def.add_vertex(VertexSpec::sink("end", vec![VariableBinding::selector("count", &["docs", "count"])]));
    def.connect("start", "docs");
    def.connect("docs", "end");

    let result = build(&def)
        .unwrap()
        .execute(inputs(&[("q", "ownership")]), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.outputs.get("count"), Some(&Value::from(2usize)));
    let docs = result.output("docs", "result").unwrap();
    assert_eq!(
        docs.get_path(["0", "content"]).and_then(Value::as_str),
        Some("ownership #0")
    );
}

#[test]
fn test_rejects_cycles() {
    let mut def = greeting_graph();
    def.connect("end", "greet");
    assert!(matches!(validation_error(&def), ValidationError::CyclicDependency(_)));
}

#[test]
fn test_rejects_structural_errors() {
    let mut def = greeting_graph();
    def.connect("greet", "ghost");
    assert!(matches!(validation_error(&def), ValidationError::DanglingEdge { .. }));

    let mut def = greeting_graph();
    def.add_vertex(VertexSpec::answer("env", "x"));
    assert_eq!(validation_error(&def), ValidationError::ReservedVertexId("env".into()));

    let mut def = greeting_graph();
    def.add_vertex(VertexSpec::template("greet", "again"));
    assert_eq!(validation_error(&def), ValidationError::DuplicateVertex("greet".into()));

    let mut def = greeting_graph();
    def.add_vertex(VertexSpec::template("orphan", "x"));
    assert_eq!(validation_error(&def), ValidationError::MissingIncomingEdge("orphan".into()));

    let mut def = GraphDefinition::new("no sink");
    def.add_vertex(VertexSpec::source("start", &[]));
    def.add_vertex(VertexSpec::template("t", "x"));
    def.connect("start", "t");
    assert_eq!(validation_error(&def), ValidationError::NoSink);
}

#[test]
fn test_rejects_references_to_non_ancestors() {
    let mut def = GraphDefinition::new("siblings");
    def.add_vertex(VertexSpec::source("start", &[]));
    def.add_vertex(VertexSpec::template("a", "x"));
    def.add_vertex(VertexSpec::template("b", "{{#a.output#}}"));
    def.add_vertex(VertexSpec::answer("end", "{{#b.output#}}"));
    def.connect("start", "a");
    def.connect("start", "b");
    def.connect("a", "end");
    def.connect("b", "end");

    assert_eq!(
        validation_error(&def),
        ValidationError::UnknownReference {
            vertex: "b".into(),
            reference: "{{#a.output#}}".into()
        }
    );
}

#[test]
fn test_rejects_bad_branches_and_ports() {
    let mut def = greeting_graph();
    def.edges[0] = EdgeSpec::new("start", "greet").with_branch("yes");
    assert!(matches!(validation_error(&def), ValidationError::BranchOnNonCondition { .. }));

    let mut def = routing_graph();
    def.connect("route", "no");
    assert!(matches!(validation_error(&def), ValidationError::MissingBranchLabel { .. }));

    let mut def = routing_graph();
    def.connect_branch("route", "maybe", "no");
    assert!(matches!(validation_error(&def), ValidationError::UnknownBranch { .. }));

    let mut def = greeting_graph();
    def.vertices[1] = VertexSpec::template("greet", "{{ who }}").with_port("who");
    assert!(matches!(validation_error(&def), ValidationError::UnboundInputPort { .. }));
}

#[test]
fn test_rejects_unknown_tools_and_nested_errors() {
    let mut def = greeting_graph();
    def.add_vertex(VertexSpec::function("call", "no.such.tool"));
    def.connect("start", "call");
    assert_eq!(
        validation_error(&def),
        ValidationError::UnknownTool {
            vertex: "call".into(),
            tool: "no.such.tool".into()
        }
    );

    let mut def = counting_loop();
    if let VertexKind::Loop(config) = &mut def.vertices[1].kind {
        config.graph.vertices.pop();
    }
    assert!(matches!(validation_error(&def), ValidationError::Nested { vertex, .. } if vertex == "counter"));
}
