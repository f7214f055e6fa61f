//! Agent module - the SQL question-answering agent.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Build context with system prompt and the user's question
//! 2. Call the model with the SQL tools
//! 3. If the model requests tool calls, execute them and feed results back
//! 4. Repeat until the model answers without tools or max iterations is reached

mod agent_loop;
mod prompt;

pub use agent_loop::{extract_answer, Agent, AgentRun, AGENT_ERROR_PREFIX, FALLBACK_ANSWER};
pub use prompt::build_system_prompt;
