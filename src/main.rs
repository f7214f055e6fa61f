//! procesadores-bot - HTTP Server Entry Point
//!
//! Starts the HTTP server that serves the chat page.

use procesadores_bot::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procesadores_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, backend={}",
        config.model,
        config.data_source.kind.as_str()
    );

    api::serve(config).await?;

    Ok(())
}
