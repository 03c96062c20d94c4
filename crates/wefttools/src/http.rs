use async_trait::async_trait;
use serde_json::{json, Map, Value};
use weftcore::{Tool, ToolContext, ToolError};

/// HTTP request tool
pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http.request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request and return its status, headers and body"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "enum": ["GET", "POST", "PUT", "DELETE"] },
                "headers": { "type": "object", "additionalProperties": { "type": "string" } },
                "body": {}
            },
            "required": ["url"]
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(30)
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("url must be a string".to_string()))?;
        let method = args.get("method").and_then(Value::as_str).unwrap_or("GET");

        tracing::info!(vertex = %ctx.vertex_id, "{} {}", method, url);

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unsupported method: {}",
                    method
                )))
            }
        };

        let request = match args.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(body),
        };

        // Add headers if provided
        let request = if let Some(Value::Object(headers)) = args.get("headers") {
            let mut req = request;
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    req = req.header(key.as_str(), val_str);
                }
            }
            req
        } else {
            request
        };

        let response = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(ToolError::Cancelled),
            response = request.send() => response
                .map_err(|e| ToolError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
        };

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        tracing::debug!("Response status: {}", status);

        Ok(json!({
            "status": status,
            "headers": headers,
            "body": body,
        }))
    }
}
