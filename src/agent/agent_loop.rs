//! Core agent loop implementation.

use std::sync::Arc;

use crate::datasource::SqlBackend;
use crate::llm::{ChatMessage, LlmClient, Role, ToolCall};
use crate::tools::ToolRegistry;

use super::prompt::build_system_prompt;

/// Shown when the transcript holds no usable assistant text.
pub const FALLBACK_ANSWER: &str = "No se pudo interpretar la respuesta. Verifica tu consulta.";

/// Prefix of the answer shown when the agent fails.
pub const AGENT_ERROR_PREFIX: &str = "Ocurrió un error al procesar tu consulta: ";

/// Full conversation produced by one question.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub messages: Vec<ChatMessage>,
    pub iterations: usize,
}

/// The SQL agent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    model: String,
    system_prompt: String,
    max_iterations: usize,
}

impl Agent {
    /// Create an agent over the given model and data source.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        backend: Arc<dyn SqlBackend>,
        model: &str,
        max_iterations: usize,
    ) -> Self {
        let system_prompt_dialect = backend.dialect().to_string();
        let tools = ToolRegistry::sql_toolkit(backend, Arc::clone(&llm), model);
        let system_prompt = build_system_prompt(&system_prompt_dialect, &tools);

        Self {
            llm,
            tools,
            model: model.to_string(),
            system_prompt,
            max_iterations,
        }
    }

    /// Answer one question, never failing: errors become display text.
    pub async fn answer(&self, question: &str) -> String {
        match self.invoke(question).await {
            Ok(run) => extract_answer(&run),
            Err(e) => {
                tracing::warn!(error = %e, "Agent invocation failed");
                format!("{}{}", AGENT_ERROR_PREFIX, e)
            }
        }
    }

    /// Run the question through the tool loop and return the transcript.
    pub async fn invoke(&self, question: &str) -> anyhow::Result<AgentRun> {
        let mut messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(question),
        ];

        let tool_schemas = self.tools.get_tool_schemas();

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent iteration {}", iteration + 1);

            let response = self
                .llm
                .chat_completion(&self.model, &messages, Some(tool_schemas.as_slice()))
                .await?;

            if let Some(tool_calls) = &response.tool_calls {
                if !tool_calls.is_empty() {
                    messages.push(ChatMessage {
                        role: Role::Assistant,
                        content: response.content.clone(),
                        tool_calls: Some(tool_calls.clone()),
                        tool_call_id: None,
                        name: None,
                    });

                    for tool_call in tool_calls {
                        tracing::info!(
                            tool = %tool_call.function.name,
                            args = %tool_call.function.arguments,
                            "Calling tool"
                        );

                        let result_str = match self.execute_tool_call(tool_call).await {
                            Ok(output) => output,
                            Err(e) => format!("Error: {}", e),
                        };
                        tracing::debug!(
                            tool = %tool_call.function.name,
                            "Tool result: {}",
                            truncate_for_log(&result_str, 1000)
                        );

                        messages.push(ChatMessage::tool_result(tool_call, result_str));
                    }

                    continue;
                }
            }

            // No tool calls: the model is done, even if it said nothing.
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: response.content,
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
            return Ok(AgentRun {
                messages,
                iterations: iteration + 1,
            });
        }

        Err(anyhow::anyhow!(
            "Max iterations ({}) reached without completion",
            self.max_iterations
        ))
    }

    async fn execute_tool_call(&self, tool_call: &ToolCall) -> anyhow::Result<String> {
        let raw = tool_call.function.arguments.trim();
        let args: serde_json::Value = if raw.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("Invalid JSON in tool arguments: {}", e))?
        };

        self.tools.execute(&tool_call.function.name, args).await
    }
}

/// The last assistant message with non-blank text, trimmed, or the
/// fallback notice when there is none.
pub fn extract_answer(run: &AgentRun) -> String {
    run.messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .filter_map(|m| m.content.as_deref())
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(|c| c.to_string())
        .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut idx = max_len;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    format!("{}... [truncated]", &s[..idx])
}
