use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use dcnews_backend::core::config::AppPaths;
use dcnews_backend::core::logging;
use dcnews_backend::server;
use dcnews_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(&AppPaths::new());
    let state = AppState::initialize().await?;

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("{}:{}", state.settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("DCNEWS_PORT={}", addr.port());
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router(state.clone());

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
