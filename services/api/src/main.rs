mod config;
mod routes;

use crate::config::Config;
use crate::routes::AppState;
use anyhow::Context;
use interview_core::chat::ChatTurnHandler;
use interview_core::llm::ChatCompletionsClient;
use interview_core::store::MemoryStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    // Initialize the tracing subscriber for logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let store = Arc::new(MemoryStore::new());
    for user in &config.known_users {
        store.register_user(user).await;
    }
    info!("Registered {} known users", config.known_users.len());

    let model = Arc::new(ChatCompletionsClient::new(config.llm_config()));
    let chat = Arc::new(ChatTurnHandler::new(store.clone(), model));
    let state = AppState { store, chat };

    // Configure a permissive CORS policy so a separate frontend can call the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!("Starting interview API, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down...");
            }
        })
        .await?;

    Ok(())
}
