//! HTTP API: the chat page plus a small JSON surface.

pub mod page;
pub mod routes;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::assistant::Assistant;
use crate::config::Config;
use crate::datasource;
use crate::llm::OllamaClient;
use crate::session::{self, SessionStore};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Wire the data source, model client and agent together and serve HTTP
/// until the process is stopped.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let backend = datasource::connect(&config.data_source).await?;
    let llm = Arc::new(OllamaClient::new(config.ollama_base_url.clone())?);
    let agent = Agent::new(llm, Arc::clone(&backend), &config.model, config.max_iterations);
    let sessions = SessionStore::new().with_idle_minutes(config.session_idle_minutes);
    if config.session_idle_minutes > 0 {
        tokio::spawn(session::idle_cleanup_loop(
            sessions.clone(),
            SESSION_SWEEP_INTERVAL,
        ));
    }
    let assistant = Assistant::new(backend, agent, sessions);

    let app = routes::router(Arc::new(routes::AppState { assistant }));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
