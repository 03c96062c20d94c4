use std::collections::HashMap;
use weftcore::{
    ConditionCase, EdgeSpec, GraphDefinition, LlmConfig, Value, VariableBinding, VertexKind,
    VertexSpec, WorkflowDocument,
};

const EDITOR_DOCUMENT: &str = r#"
app:
  name: triage
  mode: workflow
kind: app
version: 0.1.5
workflow:
  environment_variables:
    - {name: topic, value_type: string, value: AI}
  conversation_variables:
    - {name: locale, value_type: string, value: en}
  graph:
    nodes:
      - id: start
        type: custom
        position: {x: 30, y: 200}
        data:
          type: start
          title: Start
          variables:
            - {variable: question, label: Question, type: paragraph, required: true}
      - id: route
        data:
          type: if-else
          title: Route
          cases:
            - case_id: search
              logical_operator: and
              conditions:
                - variable_selector: [start, question]
                  comparison_operator: contains
                  value: find
      - id: llm
        data:
          type: llm
          title: Answer
          model: {provider: openai, name: gpt-4o, mode: chat, completion_params: {temperature: 0.2}}
          prompt_template:
            - {role: system, text: "You write about {{#env.topic#}}."}
            - {role: user, text: "{{#start.question#}}"}
          retry_config: {retry_enabled: true, max_retries: 2, retry_interval: 250}
      - id: docs
        data:
          type: knowledge-retrieval
          query_variable_selector: [start, question]
          dataset_ids: [kb1]
          multiple_retrieval_config: {top_k: 6, score_threshold: null}
      - id: end
        data:
          type: end
          outputs:
            - {variable: answer, value_selector: [llm, text]}
      - id: end_docs
        data:
          type: end
          outputs:
            - {variable: docs, value_selector: [docs, result]}
    edges:
      - {id: e1, source: start, sourceHandle: source, target: route, targetHandle: target}
      - {id: e2, source: route, sourceHandle: "false", target: llm, targetHandle: target}
      - {id: e3, source: route, sourceHandle: search, target: docs, targetHandle: target}
      - {id: e4, source: llm, sourceHandle: source, target: end, targetHandle: target}
      - {id: e5, source: docs, sourceHandle: source, target: end_docs, targetHandle: target}
"#;

#[test]
fn imports_editor_document() {
    let imported = WorkflowDocument::parse(EDITOR_DOCUMENT)
        .unwrap()
        .into_definition()
        .unwrap();

    assert_eq!(imported.environment.get("topic"), Some(&Value::from("AI")));
    assert_eq!(imported.conversation.get("locale"), Some(&Value::from("en")));

    let def = imported.definition;
    assert_eq!(def.name, "triage");
    assert_eq!(def.vertices.len(), 6);

    let start = def.find_vertex("start").unwrap();
    assert_eq!(start.position.map(|p| p.x), Some(30.0));
    match &start.kind {
        VertexKind::Source(config) => assert!(config.variables[0].required),
        other => panic!("unexpected kind {:?}", other),
    }

    let llm = def.find_vertex("llm").unwrap();
    let retry = llm.retry_policy.as_ref().unwrap();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.delay_ms, 250);

    match &def.find_vertex("docs").unwrap().kind {
        VertexKind::Retrieval(config) => {
            assert_eq!(config.top_k, 6);
            assert_eq!(config.query_template().as_deref(), Some("{{#start.question#}}"));
        }
        other => panic!("unexpected kind {:?}", other),
    }

    let branches: Vec<_> = def
        .edges
        .iter()
        .filter(|e| e.source == "route")
        .map(|e| e.branch.clone())
        .collect();
    assert_eq!(branches, vec![Some("false".to_string()), Some("search".to_string())]);
    assert!(def.edges.iter().all(|e| e.source_port.is_none() && e.target_port.is_none()));
}

#[test]
fn export_then_import_preserves_structure() {
    let mut def = GraphDefinition::new("roundtrip");
    def.add_vertex(VertexSpec::source("start", &["q"]));
    def.add_vertex(VertexSpec::condition(
        "check",
        vec![ConditionCase::expression("long", "{{#start.q#}} is not empty")],
    ));
    def.add_vertex(
        VertexSpec::llm("llm", LlmConfig::new("openai", "gpt-4o").user("{{ q }}")).with_port("q"),
    );
    def.add_vertex(VertexSpec::sink(
        "end",
        vec![VariableBinding::selector("text", &["llm", "text"])],
    ));
    def.add_vertex(VertexSpec::answer("fallback", "nothing to do"));
    def.connect("start", "check");
    def.add_edge(EdgeSpec::new("check", "llm").with_branch("long"));
    def.connect_branch("check", "false", "fallback");
    def.connect_ports("start", "q", "llm", "q");
    def.connect("llm", "end");

    let env = HashMap::from([("topic".to_string(), Value::from("AI"))]);
    let document = WorkflowDocument::from_definition(&def, &env, &HashMap::new()).unwrap();
    let yaml = document.to_yaml().unwrap();

    let imported = WorkflowDocument::parse(&yaml).unwrap().into_definition().unwrap();
    let back = imported.definition;

    assert_eq!(imported.environment, env);
    let ids: Vec<_> = back.vertices.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["start", "check", "llm", "end", "fallback"]);

    let strip = |edges: &[EdgeSpec]| {
        edges
            .iter()
            .map(|e| (e.source.clone(), e.source_port.clone(), e.target.clone(), e.target_port.clone(), e.branch.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&back.edges), strip(&def.edges));
    assert_eq!(back.find_vertex("llm").unwrap().ports.len(), 1);
}

#[test]
fn json_graph_without_envelope() {
    let json = r#"{
        "nodes": [
            {"id": "s", "data": {"type": "start"}},
            {"id": "e", "data": {"type": "answer", "answer": "hi"}}
        ],
        "edges": [{"source": "s", "target": "e"}]
    }"#;
    let imported = WorkflowDocument::parse(json).unwrap().into_definition().unwrap();
    assert_eq!(imported.definition.edges[0], EdgeSpec::new("s", "e"));
}
