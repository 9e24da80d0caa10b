use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, corpus, digest, health, jobs};
use crate::state::AppState;

/// Creates the application router with all routes and middleware.
///
/// This function sets up:
/// - CORS middleware
/// - Health and corpus statistics endpoints
/// - Chat and conversation read-back
/// - Ingestion, retention and article browsing
/// - Reindex jobs, the daily digest and the story feed
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/stats", get(health::stats))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/conversations/:conversation_id",
            get(chat::get_conversation),
        )
        .route("/api/ingest", post(corpus::ingest))
        .route("/api/retention/sweep", post(corpus::retention_sweep))
        .route("/api/articles", get(corpus::list_articles))
        .route("/api/articles/:article_id", get(corpus::get_article))
        .route("/api/reindex", post(jobs::start_reindex))
        .route("/api/jobs/:job_id", get(jobs::get_job))
        .route("/api/digest", post(digest::generate_digest))
        .route("/api/stories", get(digest::list_stories))
        .route(
            "/api/stories/:article_id/summary",
            post(digest::summarize_story),
        )
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let allowed_origins = resolve_allowed_origins(&state.settings.server.cors_allowed_origins)
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn resolve_allowed_origins(configured: &[String]) -> Vec<String> {
    let origins = configured
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return default_local_origins();
    }

    origins
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://127.0.0.1:8000".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_origins_fall_back_to_local_defaults() {
        let origins = resolve_allowed_origins(&["  ".to_string()]);
        assert!(origins.contains(&"http://localhost:5173".to_string()));
    }

    #[test]
    fn configured_origins_are_trimmed() {
        let origins = resolve_allowed_origins(&[" https://news.example.com ".to_string()]);
        assert_eq!(origins, vec!["https://news.example.com".to_string()]);
    }
}
