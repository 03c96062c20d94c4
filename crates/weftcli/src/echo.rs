use async_trait::async_trait;
use weftcore::{
    EmbeddingRequest, Message, ModelRequest, ModelResponse, ModelService, Role, ServiceError,
    ToolCall, Usage,
};

/// Offline model service for trying workflows without a provider.
///
/// Answers with the last user message. A user message of the form
/// `/call <tool> <json>` requests that tool once; the tool's result is then
/// echoed back as the answer.
pub struct EchoModel;

impl EchoModel {
    fn reply(messages: &[Message]) -> ModelResponse {
        let Some(last) = messages.last() else {
            return ModelResponse::text("(empty conversation)");
        };

        if last.role == Role::Tool {
            let results: Vec<&str> = messages
                .iter()
                .rev()
                .take_while(|m| m.role == Role::Tool)
                .map(|m| m.content.as_str())
                .collect();
            return ModelResponse::text(format!(
                "Tool results: {}",
                results.into_iter().rev().collect::<Vec<_>>().join(", ")
            ));
        }

        if let Some(rest) = last.content.strip_prefix("/call ") {
            let (name, arguments) = rest.split_once(' ').unwrap_or((rest, "{}"));
            return ModelResponse::tool_calls(vec![ToolCall::new("call_0", name.trim(), arguments.trim())]);
        }

        ModelResponse::text(format!("[echo] {}", last.content))
    }
}

#[async_trait]
impl ModelService for EchoModel {
    async fn invoke_model(&self, request: &ModelRequest) -> Result<ModelResponse, ServiceError> {
        let mut response = Self::reply(&request.messages);
        let input: usize = request.messages.iter().map(|m| m.content.split_whitespace().count()).sum();
        response.usage = Some(Usage {
            input_tokens: input as u64,
            output_tokens: response.content.split_whitespace().count() as u64,
        });
        Ok(response)
    }

    async fn invoke_embedding(&self, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>, ServiceError> {
        // Letter-frequency vectors, enough to exercise embedding vertices
        Ok(request
            .inputs
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; 26];
                for c in text.chars().filter(char::is_ascii_alphabetic) {
                    vector[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}
