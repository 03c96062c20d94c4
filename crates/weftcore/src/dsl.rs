//! Workflow documents in the visual editor's node/edge vocabulary.
//!
//! A document is a `nodes` + `edges` graph whose node `data` carries the
//! vertex configuration. Children of loops and groups are either nested under
//! `data.graph` or listed flat with a `parentId`. Edge handles named `source` /
//! `target` mean "no port"; on edges leaving an `if-else` node the source
//! handle is the branch label.

use crate::{DslError, EdgeSpec, GraphDefinition, Position, RetryPolicy, Value, VertexKind, VertexSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SOURCE_HANDLE: &str = "source";
const TARGET_HANDLE: &str = "target";

const SUPPORTED_TYPES: &[&str] = &[
    "start",
    "loop-start",
    "end",
    "answer",
    "llm",
    "if-else",
    "loop",
    "knowledge-retrieval",
    "tool",
    "template-transform",
    "embedding",
    "group",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A complete workflow document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub app: AppInfo,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub workflow: WorkflowSection,
}

fn default_kind() -> String {
    "app".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default)]
    pub environment_variables: Vec<DocumentVariable>,
    #[serde(default)]
    pub conversation_variables: Vec<DocumentVariable>,
    pub graph: DocumentGraph,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, alias = "default")]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentGraph {
    #[serde(default)]
    pub nodes: Vec<DocumentNode>,
    #[serde(default)]
    pub edges: Vec<DocumentEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

fn default_node_type() -> String {
    "custom".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(rename = "sourceHandle", default = "default_source_handle")]
    pub source_handle: String,
    pub target: String,
    #[serde(rename = "targetHandle", default = "default_target_handle")]
    pub target_handle: String,
}

fn default_source_handle() -> String {
    SOURCE_HANDLE.to_string()
}

fn default_target_handle() -> String {
    TARGET_HANDLE.to_string()
}

/// Result of importing a document
#[derive(Debug, Clone)]
pub struct ImportedWorkflow {
    pub definition: GraphDefinition,
    /// Seeds the environment scope
    pub environment: HashMap<String, Value>,
    /// Seeds the user scope
    pub conversation: HashMap<String, Value>,
}

impl WorkflowDocument {
    /// Parse JSON or YAML. Accepts a full document, a bare `{graph: ..}`
    /// section, or a bare `{nodes, edges}` graph.
    pub fn parse(text: &str) -> Result<Self, DslError> {
        let raw: serde_json::Value = if text.trim_start().starts_with('{') {
            serde_json::from_str(text)?
        } else {
            serde_yaml::from_str(text)?
        };
        Self::from_value(raw)
    }

    pub fn from_value(raw: serde_json::Value) -> Result<Self, DslError> {
        if raw.get("workflow").is_some() {
            return Ok(serde_json::from_value(raw)?);
        }
        let graph = if let Some(graph) = raw.get("graph") {
            graph.clone()
        } else if raw.get("nodes").is_some() {
            raw
        } else {
            return Err(DslError::MissingGraph);
        };
        Ok(Self {
            app: AppInfo::default(),
            kind: default_kind(),
            version: default_version(),
            workflow: WorkflowSection {
                graph: serde_json::from_value(graph)?,
                ..Default::default()
            },
        })
    }

    pub fn to_json(&self) -> Result<String, DslError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, DslError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn into_definition(self) -> Result<ImportedWorkflow, DslError> {
        let scope = |vars: Vec<DocumentVariable>| -> HashMap<String, Value> {
            vars.into_iter().map(|v| (v.name, v.value)).collect()
        };
        let environment = scope(self.workflow.environment_variables);
        let conversation = scope(self.workflow.conversation_variables);

        let mut definition = build_level(&self.workflow.graph, None)?;
        definition.name = self.app.name;
        definition.description = self.app.description;

        Ok(ImportedWorkflow {
            definition,
            environment,
            conversation,
        })
    }

    /// Export a definition. Inner graphs stay nested under `data.graph`.
    pub fn from_definition(
        definition: &GraphDefinition,
        environment: &HashMap<String, Value>,
        conversation: &HashMap<String, Value>,
    ) -> Result<Self, DslError> {
        let scope = |vars: &HashMap<String, Value>| {
            let mut out: Vec<DocumentVariable> = vars
                .iter()
                .map(|(name, value)| DocumentVariable {
                    name: name.clone(),
                    value_type: Some(value.type_name().to_string()),
                    value: value.clone(),
                })
                .collect();
            out.sort_by(|a, b| a.name.cmp(&b.name));
            out
        };

        let nodes = definition
            .vertices
            .iter()
            .map(export_node)
            .collect::<Result<Vec<_>, _>>()?;
        let edges = definition.edges.iter().map(export_edge).collect();

        Ok(Self {
            app: AppInfo {
                name: definition.name.clone(),
                mode: Some("workflow".to_string()),
                description: definition.description.clone(),
            },
            kind: default_kind(),
            version: default_version(),
            workflow: WorkflowSection {
                environment_variables: scope(environment),
                conversation_variables: scope(conversation),
                graph: DocumentGraph { nodes, edges },
            },
        })
    }
}

/// Build the vertices whose parent is `parent`, recursing into children.
fn build_level(graph: &DocumentGraph, parent: Option<&str>) -> Result<GraphDefinition, DslError> {
    let mut definition = GraphDefinition::default();
    let parents: HashMap<&str, Option<&str>> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.parent_id.as_deref()))
        .collect();

    for node in graph.nodes.iter().filter(|n| n.parent_id.as_deref() == parent) {
        let mut vertex = import_node(node)?;
        let has_children = graph.nodes.iter().any(|n| n.parent_id.as_deref() == Some(&node.id));
        if has_children {
            let children = build_level(graph, Some(&node.id))?;
            let inner = vertex.kind.inner_graph_mut().ok_or_else(|| DslError::InvalidNode {
                node: node.id.clone(),
                reason: "only loop and group nodes may have children".to_string(),
            })?;
            inner.vertices.extend(children.vertices);
            inner.edges.extend(children.edges);
        }
        definition.add_vertex(vertex);
    }

    for edge in &graph.edges {
        let source_parent = parents.get(edge.source.as_str()).copied().flatten();
        let target_parent = parents.get(edge.target.as_str()).copied().flatten();
        match (source_parent == parent, target_parent == parent) {
            (true, true) => {}
            (false, false) => continue,
            _ => {
                return Err(DslError::InvalidNode {
                    node: edge.source.clone(),
                    reason: format!("edge to '{}' crosses a loop or group boundary", edge.target),
                })
            }
        }
        let branching = definition
            .find_vertex(&edge.source)
            .is_some_and(|v| matches!(v.kind, VertexKind::Condition(_)));
        definition.add_edge(import_edge(edge, branching));
    }

    Ok(definition)
}

fn import_node(node: &DocumentNode) -> Result<VertexSpec, DslError> {
    let mut data = match &node.data {
        serde_json::Value::Object(map) => map.clone(),
        _ => {
            return Err(DslError::InvalidNode {
                node: node.id.clone(),
                reason: "node data must be an object".to_string(),
            })
        }
    };

    let node_type = data
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    if !SUPPORTED_TYPES.contains(&node_type.as_str()) {
        return Err(DslError::UnsupportedNodeType {
            node: node.id.clone(),
            node_type,
        });
    }

    data.insert("id".to_string(), serde_json::Value::String(node.id.clone()));
    if let Some(position) = node.position {
        data.insert("position".to_string(), serde_json::to_value(position)?);
    }
    if !data.contains_key("retry_policy") {
        if let Some(policy) = retry_from_editor(data.get("retry_config")) {
            data.insert("retry_policy".to_string(), serde_json::to_value(policy)?);
        }
    }
    if node_type == "knowledge-retrieval" {
        if let Some(serde_json::Value::Object(multi)) = data.get("multiple_retrieval_config").cloned() {
            for key in ["top_k", "score_threshold"] {
                if let Some(value) = multi.get(key).filter(|v| !v.is_null()) {
                    data.entry(key.to_string()).or_insert_with(|| value.clone());
                }
            }
        }
    }

    serde_json::from_value(serde_json::Value::Object(data)).map_err(|e| DslError::InvalidNode {
        node: node.id.clone(),
        reason: e.to_string(),
    })
}

/// `retry_config: {retry_enabled, max_retries, retry_interval}`
fn retry_from_editor(config: Option<&serde_json::Value>) -> Option<RetryPolicy> {
    let config = config?;
    if !config.get("retry_enabled").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    let defaults = RetryPolicy::default();
    Some(RetryPolicy {
        max_attempts: config
            .get("max_retries")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32 + 1)
            .unwrap_or(defaults.max_attempts),
        delay_ms: config
            .get("retry_interval")
            .and_then(|v| v.as_u64())
            .unwrap_or(defaults.delay_ms),
        ..defaults
    })
}

fn import_edge(edge: &DocumentEdge, branching: bool) -> EdgeSpec {
    let handle = |h: &str, unset: &str| (!h.is_empty() && h != unset).then(|| h.to_string());
    let source_handle = handle(&edge.source_handle, SOURCE_HANDLE);
    let mut spec = EdgeSpec::new(edge.source.clone(), edge.target.clone());
    spec.id = (!edge.id.is_empty()).then(|| edge.id.clone());
    if branching {
        spec.branch = source_handle;
    } else {
        spec.source_port = source_handle;
    }
    spec.target_port = handle(&edge.target_handle, TARGET_HANDLE);
    spec
}

fn export_node(vertex: &VertexSpec) -> Result<DocumentNode, DslError> {
    let mut data = match serde_json::to_value(vertex)? {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    data.remove("id");
    data.remove("position");
    Ok(DocumentNode {
        id: vertex.id.clone(),
        node_type: default_node_type(),
        data: serde_json::Value::Object(data),
        position: vertex.position,
        parent_id: None,
    })
}

fn export_edge(edge: &EdgeSpec) -> DocumentEdge {
    let source_handle = edge
        .branch
        .clone()
        .or_else(|| edge.source_port.clone())
        .unwrap_or_else(default_source_handle);
    let target_handle = edge.target_port.clone().unwrap_or_else(default_target_handle);
    DocumentEdge {
        id: edge
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}-{}", edge.source, source_handle, edge.target, target_handle)),
        source: edge.source.clone(),
        source_handle,
        target: edge.target.clone(),
        target_handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT_LOOP: &str = r#"
nodes:
  - id: start
    data: {type: start, title: Start}
  - id: counter
    data:
      type: loop
      loop_count: 5
      loop_variables:
        - {label: count, value: 0}
  - id: counter_start
    parentId: counter
    data: {type: loop-start}
  - id: bump
    parentId: counter
    data:
      type: end
      outputs:
        - {variable: count, value: "{{#counter.count#}}"}
  - id: done
    data: {type: end}
edges:
  - {source: start, target: counter}
  - {source: counter_start, target: bump}
  - {source: counter, target: done}
"#;

    #[test]
    fn flat_children_move_into_parent_graph() {
        let imported = WorkflowDocument::parse(FLAT_LOOP).unwrap().into_definition().unwrap();
        let def = imported.definition;
        assert_eq!(def.vertices.len(), 3);
        assert_eq!(def.edges.len(), 2);
        let inner = def.find_vertex("counter").unwrap().kind.inner_graph().unwrap();
        assert_eq!(inner.vertices.len(), 2);
        assert_eq!(inner.edges.len(), 1);
    }

    #[test]
    fn unsupported_node_type_is_rejected() {
        let err = WorkflowDocument::parse(r#"{"nodes":[{"id":"c","data":{"type":"code"}}],"edges":[]}"#)
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(matches!(err, DslError::UnsupportedNodeType { .. }));
    }

    #[test]
    fn missing_graph_is_reported() {
        assert!(matches!(
            WorkflowDocument::parse(r#"{"app": {}}"#),
            Err(DslError::MissingGraph)
        ));
    }
}
