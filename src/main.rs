//! Truth or Dare Backend
//!
//! REST backend for the party game: tags, tasks, games and players in SQLite,
//! with tag-based task eligibility and tag effects on task completion.

mod api;
mod auth;
mod config;
mod db;
mod eligibility;
mod errors;
mod models;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Truth or Dare Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (TOD_API_PSK). Authentication is disabled!");
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let state = AppState {
        repo,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Tags
        .route("/tags", get(api::list_tags).post(api::create_tag))
        .route(
            "/tags/{id}",
            get(api::get_tag).put(api::update_tag).delete(api::delete_tag),
        )
        // Tasks
        .route("/tasks", get(api::list_tasks).post(api::create_task))
        .route(
            "/tasks/{id}",
            get(api::get_task).put(api::update_task).delete(api::delete_task),
        )
        // Games
        .route("/games", get(api::list_games).post(api::create_game))
        .route("/games/code/{code}", get(api::get_game_by_code))
        .route(
            "/games/{id}",
            get(api::get_game).put(api::update_game).delete(api::delete_game),
        )
        .route("/games/{id}/start", post(api::start_game))
        .route("/games/{id}/finish", post(api::finish_game))
        .route("/games/{id}/players", post(api::create_player))
        .route("/games/{id}/availability", get(api::game_availability))
        .route("/games/{id}/used-tasks", delete(api::clear_game_used_tasks))
        // Players
        .route(
            "/players/{id}",
            get(api::get_player)
                .put(api::update_player)
                .delete(api::delete_player),
        )
        .route("/players/{id}/tags", get(api::resolved_player_tags))
        .route("/players/{id}/tasks", get(api::list_player_tasks))
        .route("/players/{id}/tasks/random", get(api::random_player_task))
        .route(
            "/players/{id}/tasks/{task_id}/complete",
            post(api::complete_player_task),
        )
        .route(
            "/players/{id}/used-tasks",
            delete(api::clear_player_used_tasks),
        )
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
