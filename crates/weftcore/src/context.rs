use crate::{GraphError, Value, VertexId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Output values of one vertex, keyed by output field.
pub type Outputs = HashMap<String, Value>;

/// Scoped key/value store threaded through one execution.
///
/// The environment and user scopes are fixed for the whole invocation; the
/// output scope is written by the scheduler, once per vertex, right after the
/// vertex completes. Vertices the scheduler skipped are recorded too, so a
/// join can reference an inactive branch. Cloning is cheap: every scope is shared behind an `Arc`,
/// which is how running vertices receive their read-only snapshot.
#[derive(Debug, Clone, Default)]
pub struct Context {
    env: Arc<HashMap<String, Value>>,
    user: Arc<HashMap<String, Value>>,
    outputs: HashMap<VertexId, Arc<Outputs>>,
    skipped: HashSet<VertexId>,
}

impl Context {
    pub fn new(env: HashMap<String, Value>, user: HashMap<String, Value>) -> Self {
        Self {
            env: Arc::new(env),
            user: Arc::new(user),
            outputs: HashMap::new(),
            skipped: HashSet::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.env).insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.user).insert(key.into(), value.into());
        self
    }

    pub fn env(&self, name: &str) -> Option<&Value> {
        self.env.get(name)
    }

    pub fn user(&self, name: &str) -> Option<&Value> {
        self.user.get(name)
    }

    pub fn env_scope(&self) -> &HashMap<String, Value> {
        &self.env
    }

    pub fn user_scope(&self) -> &HashMap<String, Value> {
        &self.user
    }

    pub fn output(&self, vertex: &str) -> Option<&Outputs> {
        self.outputs.get(vertex).map(|o| o.as_ref())
    }

    pub fn has_output(&self, vertex: &str) -> bool {
        self.outputs.contains_key(vertex)
    }

    pub fn completed_vertices(&self) -> impl Iterator<Item = &VertexId> {
        self.outputs.keys()
    }

    /// Record a vertex's outputs. A second write for the same vertex is an
    /// engine bug and is rejected.
    pub fn set_outputs(&mut self, vertex: &str, outputs: Outputs) -> Result<(), GraphError> {
        if self.outputs.contains_key(vertex) {
            return Err(GraphError::Execution(format!(
                "outputs of vertex '{}' written twice",
                vertex
            )));
        }
        self.outputs.insert(vertex.to_string(), Arc::new(outputs));
        Ok(())
    }

    pub fn mark_skipped(&mut self, vertex: &str) {
        self.skipped.insert(vertex.to_string());
    }

    pub fn is_skipped(&self, vertex: &str) -> bool {
        self.skipped.contains(vertex)
    }

    /// Fresh output scope sharing this context's environment and user scopes.
    /// Nested graphs run against a child so their intermediate outputs never
    /// reach the enclosing scope.
    pub fn child(&self) -> Context {
        Context {
            env: self.env.clone(),
            user: self.user.clone(),
            outputs: HashMap::new(),
            skipped: HashSet::new(),
        }
    }

    /// Plain JSON view of all three scopes.
    pub fn export(&self) -> serde_json::Value {
        let scope = |map: &HashMap<String, Value>| {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
        };
        let outputs = self
            .outputs
            .iter()
            .map(|(vertex, outputs)| (vertex.clone(), scope(outputs)))
            .collect();
        serde_json::json!({
            "env": scope(&self.env),
            "user": scope(&self.user),
            "outputs": serde_json::Value::Object(outputs),
        })
    }
}
