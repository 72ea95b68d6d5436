use tracing_subscriber::EnvFilter;

use multi_index_chat::api;
use multi_index_chat::config::Config;
use multi_index_chat::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    tracing::info!(
        "Indexes: primary={} secondary={} ratings={}",
        config.retrieval.primary_index_name,
        config.retrieval.secondary_index_name,
        config.retrieval.ratings_index_name
    );
    tracing::info!(
        "Chat deployment: {} (cited answers: {}, citations: {}, auth: {})",
        config.openai.deployment,
        config.chat.cited_answers,
        config.chat.citations,
        config.auth.enabled
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config)?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
