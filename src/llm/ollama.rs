//! Client for a locally hosted Ollama endpoint (`POST /api/chat`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ChatMessage, ChatResponse, FunctionCall, LlmClient, LlmError, Role, ToolCall, ToolDefinition,
};

/// Local models can take minutes on CPU.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    /// Ollama assigns no call ids; ours stay unique for the client's lifetime.
    next_call_id: AtomicUsize,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            next_call_id: AtomicUsize::new(0),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    /// Pairs a tool result with the call that asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    error: Option<String>,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = msg.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| OllamaToolCall {
                    function: OllamaFunction {
                        name: call.function.name.clone(),
                        arguments: serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| Value::Object(Default::default())),
                    },
                })
                .collect()
        });
        let tool_name = match msg.role {
            Role::Tool => msg.name.clone(),
            _ => None,
        };
        Self {
            role: msg.role,
            content: msg.content.clone().unwrap_or_default(),
            tool_calls,
            tool_name,
        }
    }
}

/// Ollama sends arguments as an object and never assigns call ids; ids
/// are numbered from `first_id`.
fn into_chat_response(message: OllamaMessage, first_id: usize) -> ChatResponse {
    let tool_calls = message.tool_calls.map(|calls| {
        calls
            .into_iter()
            .enumerate()
            .map(|(i, call)| ToolCall {
                id: format!("call_{}", first_id + i),
                function: FunctionCall {
                    name: call.function.name,
                    arguments: match call.function.arguments {
                        Value::String(s) => s,
                        Value::Null => "{}".to_string(),
                        other => other.to_string(),
                    },
                },
            })
            .collect::<Vec<_>>()
    });
    let content = if message.content.is_empty() {
        None
    } else {
        Some(message.content)
    };
    ChatResponse {
        content,
        tool_calls: tool_calls.filter(|calls| !calls.is_empty()),
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        let request = OllamaChatRequest {
            model,
            messages: messages.iter().map(OllamaMessage::from).collect(),
            tools: tools.filter(|t| !t.is_empty()),
            stream: false,
        };

        let response = self.client.post(self.chat_url()).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: error,
            });
        }
        let message = parsed
            .message
            .ok_or_else(|| LlmError::Decode("response has no message".to_string()))?;

        let calls = message.tool_calls.as_ref().map_or(0, |c| c.len());
        tracing::debug!(
            content_len = message.content.len(),
            tool_calls = calls,
            "Model turn received"
        );
        let first_id = self.next_call_id.fetch_add(calls, Ordering::Relaxed);
        Ok(into_chat_response(message, first_id))
    }
}
