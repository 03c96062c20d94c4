use crate::retry;
use crate::services::Services;
use crate::tool_manager::ToolManager;
use crate::vertex::{Vertex, VertexContext, VertexOutput};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use weftcore::{
    response_into_deltas, FinishReason, LlmConfig, Message, ModelDelta, ModelRequest, ModelService, RetryPolicy,
    ServiceError, ToolCall, ToolCallDelta, ToolDefinition, ToolResult, Usage, ValidationError,
    Value, VertexError, VertexSpec,
};

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
    complete: bool,
}

/// Merges streamed tool-call fragments into whole calls.
///
/// Fragments are keyed by their index; a fragment carrying an id already
/// seen goes to that call whatever its index says. A fragment with neither
/// extends the call opened most recently. Names arrive whole: the first
/// non-empty name sticks and later ones are ignored, while arguments are
/// concatenated in arrival order. A call is complete once its end
/// marker or the end of the reply arrives.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PendingCall>,
    by_id: HashMap<String, usize>,
    last: Option<usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: ToolCallDelta) {
        let slot = self.slot_for(delta.index, delta.id.as_deref());
        let call = self.calls.entry(slot).or_default();
        if let Some(id) = delta.id {
            if call.id.is_none() {
                self.by_id.insert(id.clone(), slot);
                call.id = Some(id);
            }
        }
        if let Some(name) = delta.name.filter(|n| !n.is_empty()) {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        if let Some(arguments) = delta.arguments {
            call.arguments.push_str(&arguments);
        }
        self.last = Some(slot);
    }

    /// Mark one call complete.
    pub fn end(&mut self, index: Option<usize>, id: Option<&str>) {
        let slot = id
            .and_then(|id| self.by_id.get(id).copied())
            .or(index)
            .or(self.last);
        if let Some(call) = slot.and_then(|s| self.calls.get_mut(&s)) {
            call.complete = true;
        }
    }

    /// End of reply: every open call is complete.
    pub fn finish(&mut self) {
        for call in self.calls.values_mut() {
            call.complete = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The assembled calls in index order.
    pub fn into_calls(self) -> Result<Vec<ToolCall>, ServiceError> {
        self.calls
            .into_iter()
            .map(|(slot, call)| {
                if !call.complete {
                    return Err(ServiceError::Stream(format!(
                        "stream ended inside tool call {}",
                        call.id.unwrap_or_else(|| slot.to_string())
                    )));
                }
                if call.name.is_empty() {
                    return Err(ServiceError::InvalidResponse(format!(
                        "tool call {} has no name",
                        call.id.unwrap_or_else(|| slot.to_string())
                    )));
                }
                let id = call.id.unwrap_or_else(|| format!("call_{}", slot));
                Ok(ToolCall::new(id, call.name, call.arguments))
            })
            .collect()
    }

    fn slot_for(&self, index: Option<usize>, id: Option<&str>) -> usize {
        if let Some(&slot) = id.and_then(|id| self.by_id.get(id)) {
            return slot;
        }
        match (index, id) {
            (Some(index), Some(id)) => {
                let taken = self
                    .calls
                    .get(&index)
                    .and_then(|c| c.id.as_deref())
                    .is_some_and(|existing| existing != id);
                if taken {
                    self.next_slot()
                } else {
                    index
                }
            }
            (Some(index), None) => index,
            (None, Some(_)) => self.next_slot(),
            (None, None) => match self.last {
                Some(slot) => slot,
                None => self.next_slot(),
            },
        }
    }

    fn next_slot(&self) -> usize {
        self.calls.keys().next_back().map_or(0, |k| k + 1)
    }
}

/// One model round, assembled from deltas.
#[derive(Default)]
struct Round {
    content: String,
    calls: ToolCallAccumulator,
    usage: Option<Usage>,
    finish: Option<FinishReason>,
}

struct RoundReply {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

impl Round {
    /// Apply one delta, returning visible text to forward.
    fn apply(&mut self, delta: ModelDelta) -> Option<String> {
        match delta {
            ModelDelta::Content(text) => {
                if text.is_empty() {
                    return None;
                }
                self.content.push_str(&text);
                return Some(text);
            }
            ModelDelta::ToolCall(fragment) => self.calls.push(fragment),
            ModelDelta::ToolCallEnd { index, id } => self.calls.end(index, id.as_deref()),
            ModelDelta::Usage(usage) => self.usage.get_or_insert_with(Usage::default).add(usage),
            ModelDelta::Finish(reason) => {
                self.calls.finish();
                self.finish = Some(reason);
            }
        }
        None
    }

    fn into_reply(self) -> Result<RoundReply, ServiceError> {
        if self.finish == Some(FinishReason::Length) {
            tracing::warn!("Model reply was cut off at the token limit");
        }
        Ok(RoundReply {
            content: self.content,
            tool_calls: self.calls.into_calls()?,
            usage: self.usage,
        })
    }
}

/// Language-model vertex: a multi-round conversation in which the model
/// may call tools before giving its answer.
pub struct LanguageModelVertex {
    config: LlmConfig,
    model: Arc<dyn ModelService>,
    tools: ToolManager,
    definitions: Vec<ToolDefinition>,
    max_rounds: u32,
    retry: RetryPolicy,
}

impl LanguageModelVertex {
    pub fn new(spec: &VertexSpec, config: LlmConfig, services: &Services) -> Result<Self, ValidationError> {
        if let Some(tool) = config.tools.iter().find(|t| !services.tools.contains(t)) {
            return Err(ValidationError::UnknownTool {
                vertex: spec.id.clone(),
                tool: tool.clone(),
            });
        }
        let max_rounds = config.max_rounds.unwrap_or(services.config.default_max_rounds);
        if max_rounds == 0 {
            return Err(ValidationError::InvalidConfig {
                vertex: spec.id.clone(),
                reason: "max_rounds must be at least 1".to_string(),
            });
        }
        Ok(Self {
            definitions: services.tools.definitions(&config.tools),
            model: services.model.clone(),
            tools: services.tool_manager(),
            retry: spec.retry_policy.clone().unwrap_or_else(|| services.config.retry.clone()),
            max_rounds,
            config,
        })
    }

    fn request(&self, messages: &[Message]) -> ModelRequest {
        ModelRequest {
            provider: self.config.model.provider.clone(),
            model: self.config.model.name.clone(),
            messages: messages.to_vec(),
            tools: self.definitions.clone(),
            parameters: self.config.model.completion_params.clone(),
        }
    }

    /// One round with retries. A round is retried only while none of its
    /// output has been forwarded.
    async fn run_round(&self, request: &ModelRequest, ctx: &VertexContext) -> Result<RoundReply, VertexError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut forwarded = false;
            match self.attempt_round(request, ctx, &mut forwarded).await {
                Ok(reply) => return Ok(reply),
                Err(VertexError::ModelCall(e)) if e.is_retryable() && !forwarded && attempt < max_attempts => {
                    let delay = retry::backoff_delay(&self.retry, attempt);
                    tracing::warn!(
                        "Model call from {} failed (attempt {}/{}), retrying in {:?}: {}",
                        ctx.vertex_id,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    retry::pause(delay, &ctx.cancellation).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_round(
        &self,
        request: &ModelRequest,
        ctx: &VertexContext,
        forwarded: &mut bool,
    ) -> Result<RoundReply, VertexError> {
        let mut round = Round::default();
        if ctx.streaming {
            let mut stream = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(VertexError::Cancelled),
                result = self.model.stream_model(request) => result.map_err(service_error)?,
            };
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.cancellation.cancelled() => return Err(VertexError::Cancelled),
                    next = stream.next() => next,
                };
                let Some(delta) = next else {
                    break;
                };
                if let Some(text) = round.apply(delta.map_err(service_error)?) {
                    ctx.events.content(text);
                    *forwarded = true;
                }
            }
        } else {
            let response = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(VertexError::Cancelled),
                result = self.model.invoke_model(request) => result.map_err(service_error)?,
            };
            for delta in response_into_deltas(response) {
                round.apply(delta);
            }
        }
        round.into_reply().map_err(service_error)
    }
}

fn service_error(e: ServiceError) -> VertexError {
    match e {
        ServiceError::Cancelled => VertexError::Cancelled,
        other => VertexError::ModelCall(other),
    }
}

#[async_trait]
impl Vertex for LanguageModelVertex {
    fn kind(&self) -> &str {
        "llm"
    }

    async fn execute(&self, ctx: VertexContext) -> Result<VertexOutput, VertexError> {
        let resolver = ctx.resolver();
        let mut messages = Vec::with_capacity(self.config.prompt_template.len());
        for prompt in &self.config.prompt_template {
            messages.push(Message {
                role: prompt.role,
                content: resolver.render(&prompt.text)?,
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }

        let mut text = String::new();
        let mut usage = Usage::default();
        let mut executed: Vec<ToolResult> = Vec::new();
        let mut rounds = 0u32;

        loop {
            if rounds >= self.max_rounds {
                tracing::warn!("Vertex {} hit the round cap of {}", ctx.vertex_id, self.max_rounds);
                return Err(VertexError::RoundCapExceeded {
                    max_rounds: self.max_rounds,
                });
            }
            rounds += 1;
            tracing::debug!("Vertex {} starting model round {}", ctx.vertex_id, rounds);

            let reply = self.run_round(&self.request(&messages), &ctx).await?;
            if let Some(round_usage) = reply.usage {
                usage.add(round_usage);
            }
            text.push_str(&reply.content);

            // Calls not yet answered, first occurrence of each id
            let answered: HashSet<&str> = messages
                .iter()
                .filter_map(|m| m.tool_call_id.as_deref())
                .collect();
            let mut seen = HashSet::new();
            let pending: Vec<ToolCall> = reply
                .tool_calls
                .iter()
                .filter(|call| !answered.contains(call.id.as_str()) && seen.insert(call.id.clone()))
                .cloned()
                .collect();
            messages.push(Message::assistant(reply.content, reply.tool_calls));

            if pending.is_empty() {
                break;
            }

            let results = self.tools.execute(&pending, &ctx.events, &ctx.cancellation).await;
            if ctx.cancellation.is_cancelled() {
                return Err(VertexError::Cancelled);
            }
            for result in results {
                messages.push(result.clone().into_message());
                executed.push(result);
            }
        }

        if text.is_empty() && executed.is_empty() {
            return Err(VertexError::EmptyResponse);
        }
        if !ctx.streaming && !text.is_empty() {
            ctx.events.content(text.clone());
        }

        tracing::info!(
            "Vertex {} finished after {} rounds ({} tool calls, {} input / {} output tokens)",
            ctx.vertex_id,
            rounds,
            executed.len(),
            usage.input_tokens,
            usage.output_tokens
        );

        let to_value = |v: serde_json::Result<serde_json::Value>| {
            v.map(Value::from)
                .map_err(|e| VertexError::ExecutionFailed(e.to_string()))
        };
        Ok(VertexOutput::new()
            .with_output("text", text)
            .with_output("messages", to_value(serde_json::to_value(&messages))?)
            .with_output("tool_calls", to_value(serde_json::to_value(&executed))?)
            .with_output("rounds", rounds)
            .with_output("usage", to_value(serde_json::to_value(usage))?))
    }
}
