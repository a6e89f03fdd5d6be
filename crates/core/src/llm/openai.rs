//! OpenAI-compatible `/chat/completions` client.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ChatBackend, ChatMessage, ChatRequest, ChatResponse, ChatStream, ProviderError,
    ToolCallRequest, ToolDefinition,
};
use crate::models::LlmProvider;

const AZURE_API_VERSION: &str = "2024-10-21";

pub struct OpenAiChat {
    provider: LlmProvider,
    base_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(provider: LlmProvider, base_url: Option<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            provider,
            base_url,
            api_key,
            client,
        }
    }

    fn endpoint(&self) -> Result<String, ProviderError> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            ProviderError::ConfigError(format!(
                "No base URL configured for {}",
                self.provider.display_name()
            ))
        })?;
        let base = base.trim_end_matches('/');
        Ok(match self.provider {
            LlmProvider::AzureOpenAI => {
                format!("{}/chat/completions?api-version={}", base, AZURE_API_VERSION)
            }
            _ => format!("{}/chat/completions", base),
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::ConfigError(format!("{} not set", self.provider.api_key_env()))
        })?;
        Ok(match self.provider {
            LlmProvider::AzureOpenAI => builder.header("api-key", key),
            _ => builder.bearer_auth(key),
        })
    }

    fn payload(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let mut payload = json!({
            "model": request.config.model,
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_to_openai).collect();
            payload["tools"] = json!(tools);
            payload["tool_choice"] = json!("auto");
        }
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let endpoint = self.endpoint()?;
        let response = self
            .authorized(self.client.post(&endpoint))?
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }
}

/// Convert a ChatMessage to OpenAI wire format
fn message_to_openai(msg: &ChatMessage) -> Value {
    let mut obj = json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    });

    if let Some(name) = &msg.name {
        obj["name"] = json!(name);
    }
    if let Some(tool_call_id) = &msg.tool_call_id {
        obj["tool_call_id"] = json!(tool_call_id);
    }
    if let Some(tool_calls) = &msg.tool_calls {
        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string()
                    }
                })
            })
            .collect();
        obj["tool_calls"] = json!(calls);
        if msg.content.is_empty() {
            obj["content"] = Value::Null;
        }
    }

    obj
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters
        }
    })
}

/// Parse a non-streaming completion
fn parse_response(json: &Value) -> Result<ChatResponse, ProviderError> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

    if let Some(tool_calls) = message["tool_calls"].as_array() {
        let calls: Vec<ToolCallRequest> = tool_calls
            .iter()
            .filter_map(|tc| {
                let id = tc["id"].as_str()?.to_string();
                let name = tc["function"]["name"].as_str()?.to_string();
                let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
                Some(ToolCallRequest {
                    id,
                    name,
                    arguments,
                })
            })
            .collect();
        if !calls.is_empty() {
            return Ok(ChatResponse::ToolCalls(calls));
        }
    }

    Ok(ChatResponse::Text(
        message["content"].as_str().unwrap_or("").to_string(),
    ))
}

/// Pull text deltas out of one SSE chunk
fn parse_sse_chunk(text: &str) -> String {
    let mut content = String::new();
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }
        if let Ok(json) = serde_json::from_str::<Value>(data) {
            if let Some(delta) = json["choices"][0]["delta"]["content"].as_str() {
                content.push_str(delta);
            }
        }
    }
    content
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    fn name(&self) -> &str {
        self.provider.display_name()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let payload = self.payload(&request, false);

        tracing::debug!(
            provider = self.name(),
            model = %request.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat request"
        );

        let json: Value = self
            .send(&payload)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        parse_response(&json)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, ProviderError> {
        let request = ChatRequest {
            tools: Vec::new(),
            ..request
        };
        let payload = self.payload(&request, true);
        let response = self.send(&payload).await?;

        // SSE events can straddle network chunks; buffer up to the last newline
        let stream = response
            .bytes_stream()
            .scan(String::new(), |buffer, result| {
                let item = match result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        match buffer.rfind('\n') {
                            Some(pos) => {
                                let complete: String = buffer.drain(..=pos).collect();
                                Ok(parse_sse_chunk(&complete))
                            }
                            None => Ok(String::new()),
                        }
                    }
                    Err(e) => Err(ProviderError::RequestFailed(e.to_string())),
                };
                futures::future::ready(Some(item))
            })
            .filter(|item| {
                futures::future::ready(!matches!(item, Ok(text) if text.is_empty()))
            });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatConfig;

    #[test]
    fn test_message_conversion() {
        let msg = ChatMessage::assistant("{}").with_name("strategy_agent");
        let wire = message_to_openai(&msg);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["name"], "strategy_agent");

        let call = ToolCallRequest {
            id: "call_1".into(),
            name: "web_search".into(),
            arguments: json!({"query": "x"}),
        };
        let wire = message_to_openai(&ChatMessage::assistant_with_tools(vec![call]));
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"query\":\"x\"}");
    }

    #[test]
    fn test_parse_tool_calls() {
        let json = json!({"choices": [{"message": {"content": null, "tool_calls": [
            {"id": "c1", "type": "function", "function": {"name": "web_search", "arguments": "{\"query\": \"ai\"}"}}
        ]}}]});
        match parse_response(&json).unwrap() {
            ChatResponse::ToolCalls(calls) => {
                assert_eq!(calls[0].name, "web_search");
                assert_eq!(calls[0].arguments["query"], "ai");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_text_and_missing_choices() {
        let json = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(parse_response(&json).unwrap(), ChatResponse::Text("hello".into()));
        assert!(parse_response(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_parse_sse_chunk() {
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n";
        assert_eq!(parse_sse_chunk(chunk), "Hello");
    }

    #[test]
    fn test_azure_endpoint_and_payload() {
        let chat = OpenAiChat::new(
            LlmProvider::AzureOpenAI,
            Some("https://res.openai.azure.com/openai/deployments/gpt-4o/".into()),
            Some("k".into()),
        );
        assert_eq!(
            chat.endpoint().unwrap(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-21"
        );

        let request = ChatRequest::new(ChatConfig::default(), vec![ChatMessage::user("hi")]);
        let payload = chat.payload(&request, true);
        assert_eq!(payload["stream"], true);
        assert!(payload.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let chat = OpenAiChat::new(LlmProvider::OpenAI, Some("http://127.0.0.1:9".into()), None);
        let request = ChatRequest::new(ChatConfig::default(), vec![ChatMessage::user("hi")]);
        let err = chat.chat(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::ConfigError(_)));
    }
}
