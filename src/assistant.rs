//! The ask pipeline: connectivity check, agent, history.

use std::sync::Arc;

use uuid::Uuid;

use crate::agent::Agent;
use crate::datasource::{check_connectivity, SqlBackend};
use crate::session::{Exchange, SessionStore};

pub struct Assistant {
    backend: Arc<dyn SqlBackend>,
    agent: Agent,
    sessions: SessionStore,
}

impl Assistant {
    pub fn new(backend: Arc<dyn SqlBackend>, agent: Agent, sessions: SessionStore) -> Self {
        Self {
            backend,
            agent,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn dialect(&self) -> &str {
        self.backend.dialect()
    }

    /// Answer a question for a session and record the exchange.
    ///
    /// If the data source is unreachable the connectivity error is the
    /// answer and the agent is not consulted. Either way the exchange is
    /// appended to the session history.
    pub async fn ask(&self, session: Uuid, question: &str) -> Exchange {
        let question = question.trim();
        tracing::info!(session = %session, question_len = question.len(), "Processing question");

        let answer = match check_connectivity(self.backend.as_ref()).await {
            Ok(_) => self.agent.answer(question).await,
            Err(message) => message,
        };

        self.sessions.append(session, question, &answer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AGENT_ERROR_PREFIX, FALLBACK_ANSWER};
    use crate::datasource::testing::{seeded_sqlite, UnreachableBackend};
    use crate::datasource::CONNECTIVITY_ERROR_PREFIX;
    use crate::llm::testing::{call, text, ScriptedLlm};
    use crate::llm::{ChatResponse, LlmError};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    async fn assistant(llm: Arc<ScriptedLlm>, backend: Arc<dyn SqlBackend>) -> Assistant {
        let agent = Agent::new(llm, Arc::clone(&backend), "llama3.2:3b", 10);
        Assistant::new(backend, agent, SessionStore::new())
    }

    #[tokio::test]
    async fn reachable_source_shows_last_assistant_message() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            call("call_0", "sql_db_schema", json!({"table_names": "procesadores"})),
            text("El campo Modelo es el nombre comercial del procesador."),
        ]));
        let backend: Arc<dyn SqlBackend> = Arc::new(seeded_sqlite().await);
        let assistant = assistant(llm, backend).await;
        let session = assistant.sessions().create().await;

        let exchange = assistant
            .ask(session, "  ¿Qué significa el campo Modelo?  ")
            .await;
        assert_eq!(exchange.question, "¿Qué significa el campo Modelo?");
        assert_eq!(
            exchange.answer,
            "El campo Modelo es el nombre comercial del procesador."
        );
    }

    #[tokio::test]
    async fn unreachable_source_skips_the_agent() {
        let llm = Arc::new(ScriptedLlm::new(vec![text("never used")]));
        let backend = Arc::new(UnreachableBackend::default());
        let assistant = assistant(llm.clone(), backend.clone()).await;
        let session = assistant.sessions().create().await;

        let exchange = assistant.ask(session, "¿Cuántos procesadores hay?").await;
        assert!(exchange.answer.starts_with(CONNECTIVITY_ERROR_PREFIX));
        assert_eq!(llm.calls(), 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(assistant.sessions().len(session).await, 1);
    }

    #[tokio::test]
    async fn agent_failure_is_recorded_as_apology() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::Decode(
            "unexpected token".to_string(),
        ))]));
        let backend: Arc<dyn SqlBackend> = Arc::new(seeded_sqlite().await);
        let assistant = assistant(llm, backend).await;
        let session = assistant.sessions().create().await;

        let exchange = assistant.ask(session, "hola").await;
        assert!(exchange.answer.starts_with(AGENT_ERROR_PREFIX));
        assert!(exchange.answer.contains("unexpected token"));
        assert_eq!(assistant.sessions().history(session).await, vec![exchange]);
    }

    #[tokio::test]
    async fn missing_answer_shows_fallback_verbatim() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ChatResponse {
            content: Some("\n  \n".to_string()),
            tool_calls: None,
        })]));
        let backend: Arc<dyn SqlBackend> = Arc::new(seeded_sqlite().await);
        let assistant = assistant(llm, backend).await;
        let session = assistant.sessions().create().await;

        let exchange = assistant.ask(session, "hola").await;
        assert_eq!(exchange.answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn n_submissions_render_newest_first() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            text("uno"),
            text("dos"),
            text("tres"),
        ]));
        let backend: Arc<dyn SqlBackend> = Arc::new(seeded_sqlite().await);
        let assistant = assistant(llm, backend).await;
        let session = assistant.sessions().create().await;

        for q in ["q1", "q2", "q3"] {
            assistant.ask(session, q).await;
        }

        let shown: Vec<(String, String)> = assistant
            .sessions()
            .recent_first(session)
            .await
            .into_iter()
            .map(|e| (e.question, e.answer))
            .collect();
        assert_eq!(
            shown,
            vec![
                ("q3".to_string(), "tres".to_string()),
                ("q2".to_string(), "dos".to_string()),
                ("q1".to_string(), "uno".to_string()),
            ]
        );
    }
}
