use crate::expression::{self, Check, CompareOp, Expression, Operand};
use crate::resolver::{has_placeholders, selector_to_template, Reference};
use crate::{ExpressionError, ModelParameters, Role, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type VertexId = String;

/// Vertex ids that would shadow a resolver scope.
pub const RESERVED_IDS: &[&str] = &["env", "user", "sys", "conversation"];

/// Branch label selected when no condition case matches.
pub const ELSE_BRANCH: &str = "false";

/// Complete graph definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default = "new_graph_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub vertices: Vec<VertexSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub settings: GraphSettings,
}

fn new_graph_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for GraphDefinition {
    fn default() -> Self {
        Self::new("")
    }
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_graph_id(),
            name: name.into(),
            description: None,
            vertices: Vec::new(),
            edges: Vec::new(),
            settings: GraphSettings::default(),
        }
    }

    pub fn add_vertex(&mut self, vertex: VertexSpec) -> VertexId {
        let id = vertex.id.clone();
        self.vertices.push(vertex);
        id
    }

    pub fn add_edge(&mut self, edge: EdgeSpec) {
        self.edges.push(edge);
    }

    /// Plain control edge.
    pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.add_edge(EdgeSpec::new(from, to));
    }

    /// Edge carrying `from.from_port` into input port `to_port` of `to`.
    pub fn connect_ports(
        &mut self,
        from: impl Into<String>,
        from_port: impl Into<String>,
        to: impl Into<String>,
        to_port: impl Into<String>,
    ) {
        self.add_edge(EdgeSpec::new(from, to).with_ports(from_port, to_port));
    }

    /// Edge that fires only when the condition `from` selects `label`.
    pub fn connect_branch(
        &mut self,
        from: impl Into<String>,
        label: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.add_edge(EdgeSpec::new(from, to).with_branch(label));
    }

    pub fn find_vertex(&self, id: &str) -> Option<&VertexSpec> {
        self.vertices.iter().find(|v| v.id == id)
    }
}

/// Per-graph execution settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_vertices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_timeout_ms: Option<u64>,
}

/// Vertex specification in a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexSpec {
    pub id: VertexId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub kind: VertexKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<InputPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl VertexSpec {
    pub fn new(id: impl Into<String>, kind: VertexKind) -> Self {
        Self {
            id: id.into(),
            title: None,
            kind,
            ports: Vec::new(),
            retry_policy: None,
            position: None,
        }
    }

    pub fn source(id: impl Into<String>, variables: &[&str]) -> Self {
        Self::new(
            id,
            VertexKind::Source(SourceConfig {
                variables: variables.iter().map(|v| InputVariable::new(*v)).collect(),
            }),
        )
    }

    pub fn sink(id: impl Into<String>, outputs: Vec<VariableBinding>) -> Self {
        Self::new(
            id,
            VertexKind::Sink(SinkConfig {
                outputs,
                answer: None,
            }),
        )
    }

    pub fn answer(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(
            id,
            VertexKind::Sink(SinkConfig {
                outputs: Vec::new(),
                answer: Some(template.into()),
            }),
        )
    }

    pub fn llm(id: impl Into<String>, config: LlmConfig) -> Self {
        Self::new(id, VertexKind::LanguageModel(config))
    }

    pub fn condition(id: impl Into<String>, cases: Vec<ConditionCase>) -> Self {
        Self::new(
            id,
            VertexKind::Condition(ConditionConfig {
                cases,
                ..Default::default()
            }),
        )
    }

    pub fn looping(id: impl Into<String>, config: LoopConfig) -> Self {
        Self::new(id, VertexKind::Loop(config))
    }

    pub fn function(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::new(
            id,
            VertexKind::Function(FunctionConfig {
                tool_name: tool_name.into(),
                tool_parameters: BTreeMap::new(),
            }),
        )
    }

    pub fn template(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(
            id,
            VertexKind::Template(TemplateConfig {
                template: template.into(),
                variables: Vec::new(),
            }),
        )
    }

    pub fn group(id: impl Into<String>, config: GroupConfig) -> Self {
        Self::new(id, VertexKind::Group(config))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_port(mut self, name: impl Into<String>) -> Self {
        self.ports.push(InputPort {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn with_port_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.ports.push(InputPort {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            ..Default::default()
        });
        self
    }

    pub fn port(&self, name: &str) -> Option<&InputPort> {
        self.ports.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Typed vertex configuration, tagged with the workflow DSL node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VertexKind {
    #[serde(rename = "start", alias = "loop-start")]
    Source(SourceConfig),
    #[serde(rename = "end", alias = "answer")]
    Sink(SinkConfig),
    #[serde(rename = "tool")]
    Function(FunctionConfig),
    #[serde(rename = "llm")]
    LanguageModel(LlmConfig),
    #[serde(rename = "if-else")]
    Condition(ConditionConfig),
    #[serde(rename = "loop")]
    Loop(LoopConfig),
    #[serde(rename = "knowledge-retrieval")]
    Retrieval(RetrievalConfig),
    #[serde(rename = "embedding")]
    Embedding(EmbeddingConfig),
    #[serde(rename = "template-transform")]
    Template(TemplateConfig),
    #[serde(rename = "group")]
    Group(GroupConfig),
}

impl VertexKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            VertexKind::Source(_) => "start",
            VertexKind::Sink(_) => "end",
            VertexKind::Function(_) => "tool",
            VertexKind::LanguageModel(_) => "llm",
            VertexKind::Condition(_) => "if-else",
            VertexKind::Loop(_) => "loop",
            VertexKind::Retrieval(_) => "knowledge-retrieval",
            VertexKind::Embedding(_) => "embedding",
            VertexKind::Template(_) => "template-transform",
            VertexKind::Group(_) => "group",
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, VertexKind::Source(_))
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, VertexKind::Sink(_))
    }

    pub fn inner_graph(&self) -> Option<&GraphDefinition> {
        match self {
            VertexKind::Loop(config) => Some(&config.graph),
            VertexKind::Group(config) => Some(&config.graph),
            _ => None,
        }
    }

    pub fn inner_graph_mut(&mut self) -> Option<&mut GraphDefinition> {
        match self {
            VertexKind::Loop(config) => Some(&mut config.graph),
            VertexKind::Group(config) => Some(&mut config.graph),
            _ => None,
        }
    }

    /// Templates resolved against the enclosing graph's context.
    pub fn templates(&self) -> Vec<String> {
        match self {
            VertexKind::Source(_) => Vec::new(),
            VertexKind::Sink(config) => config
                .outputs
                .iter()
                .filter_map(VariableBinding::template_text)
                .chain(config.answer.clone())
                .collect(),
            VertexKind::Function(config) => config
                .tool_parameters
                .values()
                .filter_map(ToolParameter::template)
                .collect(),
            VertexKind::LanguageModel(config) => {
                config.prompt_template.iter().map(|m| m.text.clone()).collect()
            }
            VertexKind::Condition(config) => config
                .effective_cases()
                .iter()
                .flat_map(|case| case.conditions.iter().filter_map(ConditionItem::value_template))
                .collect(),
            VertexKind::Loop(config) => config
                .loop_variables
                .iter()
                .filter_map(LoopVariable::initial_template)
                .chain(config.break_conditions.iter().filter_map(ConditionItem::value_template))
                .collect(),
            VertexKind::Retrieval(config) => config.query_template().into_iter().collect(),
            VertexKind::Embedding(config) => vec![config.input.clone()],
            VertexKind::Template(config) => config
                .variables
                .iter()
                .filter_map(VariableBinding::template_text)
                .collect(),
            VertexKind::Group(config) => config
                .inputs
                .iter()
                .filter_map(VariableBinding::template_text)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub variables: Vec<InputVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputVariable {
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl InputVariable {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            label: None,
            value_type: None,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A named value taken from a selector (`["vertex", "field"]`) or a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableBinding {
    pub variable: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_selector: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl VariableBinding {
    pub fn selector(variable: impl Into<String>, selector: &[&str]) -> Self {
        Self {
            variable: variable.into(),
            value_selector: selector.iter().map(|s| s.to_string()).collect(),
            value: None,
        }
    }

    pub fn template(variable: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            value_selector: Vec::new(),
            value: Some(template.into()),
        }
    }

    /// The template this binding resolves; selectors take precedence.
    pub fn template_text(&self) -> Option<String> {
        if !self.value_selector.is_empty() {
            Some(selector_to_template(&self.value_selector))
        } else {
            self.value.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub outputs: Vec<VariableBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub tool_name: String,
    #[serde(default)]
    pub tool_parameters: BTreeMap<String, ToolParameter>,
}

impl FunctionConfig {
    pub fn with_parameter(mut self, name: impl Into<String>, parameter: ToolParameter) -> Self {
        self.tool_parameters.insert(name.into(), parameter);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// Template text with placeholders
    #[default]
    Mixed,
    /// A selector array
    Variable,
    /// Passed through unchanged
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    #[serde(rename = "type", default)]
    pub kind: ParameterKind,
    pub value: Value,
}

impl ToolParameter {
    pub fn mixed(template: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::Mixed,
            value: Value::String(template.into()),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Self {
            kind: ParameterKind::Constant,
            value: value.into(),
        }
    }

    pub fn variable(selector: &[&str]) -> Self {
        Self {
            kind: ParameterKind::Variable,
            value: Value::Array(selector.iter().map(|s| Value::from(*s)).collect()),
        }
    }

    /// Template form for mixed and variable parameters.
    pub fn template(&self) -> Option<String> {
        match (self.kind, &self.value) {
            (ParameterKind::Mixed, Value::String(s)) => Some(s.clone()),
            (ParameterKind::Variable, Value::Array(items)) => Some(selector_to_template(
                &items.iter().map(Value::to_text).collect::<Vec<_>>(),
            )),
            (ParameterKind::Variable, Value::String(s)) if !has_placeholders(s) => {
                Some(format!("{{{{#{}#}}}}", s))
            }
            (ParameterKind::Variable, Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default)]
    pub provider: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub completion_params: ModelParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: ModelSelection,
    #[serde(default)]
    pub prompt_template: Vec<PromptMessage>,
    /// Registered tool names offered to the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

impl LlmConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: ModelSelection {
                provider: provider.into(),
                name: model.into(),
                ..Default::default()
            },
            prompt_template: Vec::new(),
            tools: Vec::new(),
            max_rounds: None,
        }
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.prompt_template.push(PromptMessage {
            role: Role::System,
            text: text.into(),
        });
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.prompt_template.push(PromptMessage {
            role: Role::User,
            text: text.into(),
        });
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools.extend(tools.iter().map(|t| t.to_string()));
        self
    }

    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    fn combine(self, exprs: Vec<Expression>) -> Option<Expression> {
        exprs.into_iter().reduce(|acc, e| match self {
            LogicalOperator::And => acc.and(e),
            LogicalOperator::Or => acc.or(e),
        })
    }
}

/// One structured comparison, as written by the visual editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionItem {
    pub variable_selector: Vec<String>,
    pub comparison_operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ConditionItem {
    pub fn new(selector: &[&str], operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            variable_selector: selector.iter().map(|s| s.to_string()).collect(),
            comparison_operator: operator.into(),
            value: Some(value.into()),
        }
    }

    fn value_template(&self) -> Option<String> {
        match &self.value {
            Some(Value::String(s)) if has_placeholders(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn to_expression(&self) -> Result<Expression, ExpressionError> {
        let left = Reference::parse(&self.variable_selector.join("."))
            .map(Operand::Reference)
            .map_err(|e| ExpressionError::new(e.to_string(), 0))?;
        let right = match &self.value {
            Some(Value::String(s)) if has_placeholders(s) => Operand::Template(s.clone()),
            Some(value) => Operand::Literal(value.clone()),
            None => Operand::Literal(Value::Null),
        };
        let check = |check| Ok(Expression::Check { operand: left.clone(), check });
        let op = match self.comparison_operator.trim() {
            "empty" | "is empty" => return check(Check::Empty),
            "not empty" | "is not empty" => return check(Check::NotEmpty),
            "null" | "is null" => return check(Check::Null),
            "not null" | "is not null" => return check(Check::NotNull),
            "contains" => CompareOp::Contains,
            "not contains" => CompareOp::NotContains,
            "start with" | "starts with" | "starts_with" => CompareOp::StartsWith,
            "end with" | "ends with" | "ends_with" => CompareOp::EndsWith,
            "is" | "=" | "==" => CompareOp::Eq,
            "is not" | "≠" | "!=" => CompareOp::NotEq,
            ">" => CompareOp::Gt,
            "<" => CompareOp::Lt,
            "≥" | ">=" => CompareOp::Gte,
            "≤" | "<=" => CompareOp::Lte,
            other => {
                return Err(ExpressionError::new(
                    format!("unknown comparison operator '{}'", other),
                    0,
                ))
            }
        };
        Ok(Expression::Compare { left, op, right })
    }
}

/// One branch of a condition vertex. Either a free-form `expression`, a list
/// of structured `conditions`, or both (combined with `logical_operator`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionCase {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ConditionCase {
    pub fn expression(case_id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            logical_operator: LogicalOperator::And,
            conditions: Vec::new(),
            expression: Some(expression.into()),
        }
    }

    pub fn items(case_id: impl Into<String>, operator: LogicalOperator, conditions: Vec<ConditionItem>) -> Self {
        Self {
            case_id: case_id.into(),
            logical_operator: operator,
            conditions,
            expression: None,
        }
    }

    pub fn to_expression(&self) -> Result<Expression, ExpressionError> {
        let mut parts = Vec::new();
        if let Some(source) = &self.expression {
            parts.push(expression::parse(source)?);
        }
        for item in &self.conditions {
            parts.push(item.to_expression()?);
        }
        self.logical_operator.combine(parts).ok_or_else(|| {
            ExpressionError::new(format!("case '{}' has no conditions", self.case_id), 0)
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default)]
    pub cases: Vec<ConditionCase>,
    /// Single-case form; becomes case `true`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl ConditionConfig {
    pub fn effective_cases(&self) -> Vec<ConditionCase> {
        if !self.cases.is_empty() || self.conditions.is_empty() {
            return self.cases.clone();
        }
        vec![ConditionCase::items(
            "true",
            self.logical_operator.unwrap_or_default(),
            self.conditions.clone(),
        )]
    }

    /// Every label an outgoing edge may carry.
    pub fn branch_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.effective_cases().into_iter().map(|c| c.case_id).collect();
        labels.push(ELSE_BRANCH.to_string());
        labels
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopVariable {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    /// `constant` (default) or `variable` (value is a selector)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl LoopVariable {
    pub fn constant(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            var_type: None,
            value_type: None,
            value: value.into(),
        }
    }

    pub fn is_selector(&self) -> bool {
        self.value_type.as_deref() == Some("variable")
    }

    /// Initial value template, when the value is not a plain constant.
    pub fn initial_template(&self) -> Option<String> {
        match &self.value {
            Value::Array(items) if self.is_selector() => Some(selector_to_template(
                &items.iter().map(Value::to_text).collect::<Vec<_>>(),
            )),
            Value::String(s) if has_placeholders(s) => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(rename = "loop_count", alias = "max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub loop_variables: Vec<LoopVariable>,
    /// Keep iterating while this expression holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Stop as soon as these hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub break_conditions: Vec<ConditionItem>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub graph: GraphDefinition,
}

impl LoopConfig {
    pub fn new(max_iterations: u32, graph: GraphDefinition) -> Self {
        Self {
            max_iterations,
            loop_variables: Vec::new(),
            condition: None,
            break_conditions: Vec::new(),
            logical_operator: LogicalOperator::And,
            graph,
        }
    }

    pub fn with_variable(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.loop_variables.push(LoopVariable::constant(label, value));
        self
    }

    pub fn while_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition = Some(expression.into());
        self
    }

    pub fn continue_expression(&self) -> Result<Option<Expression>, ExpressionError> {
        self.condition.as_deref().map(expression::parse).transpose()
    }

    pub fn break_expression(&self) -> Result<Option<Expression>, ExpressionError> {
        let parts = self
            .break_conditions
            .iter()
            .map(ConditionItem::to_expression)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.logical_operator.combine(parts))
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_variable_selector: Vec<String>,
    #[serde(default)]
    pub dataset_ids: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,
}

impl RetrievalConfig {
    pub fn query_template(&self) -> Option<String> {
        if !self.query_variable_selector.is_empty() {
            Some(selector_to_template(&self.query_variable_selector))
        } else {
            self.query.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub template: String,
    #[serde(default)]
    pub variables: Vec<VariableBinding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Values fed to the inner sources, resolved in the outer graph
    #[serde(default)]
    pub inputs: Vec<VariableBinding>,
    /// Inner sink outputs published by the group
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub graph: GraphDefinition,
}

/// Connection between vertices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: VertexId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    pub target: VertexId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl EdgeSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            source_port: None,
            target: target.into(),
            target_port: None,
            branch: None,
        }
    }

    pub fn with_ports(mut self, source_port: impl Into<String>, target_port: impl Into<String>) -> Self {
        self.source_port = Some(source_port.into());
        self.target_port = Some(target_port.into());
        self
    }

    pub fn with_branch(mut self, label: impl Into<String>) -> Self {
        self.branch = Some(label.into());
        self
    }
}

/// Vertex position in visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Retry policy for model calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}
