pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::session::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Session API
        .route("/api/v1/sessions", post(handlers::handle_open_session))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::handle_get_status).delete(handlers::handle_close_session),
        )
        .route(
            "/api/v1/sessions/:id/document",
            get(handlers::handle_get_document),
        )
        .route(
            "/api/v1/sessions/:id/sections/:section",
            put(handlers::handle_section_change),
        )
        .route(
            "/api/v1/sessions/:id/completion",
            get(handlers::handle_get_completion),
        )
        .route(
            "/api/v1/sessions/:id/collaborators",
            get(handlers::handle_get_collaborators),
        )
        .route("/api/v1/sessions/:id/save", post(handlers::handle_save))
        .route("/api/v1/sessions/:id/undo", post(handlers::handle_undo))
        .route("/api/v1/sessions/:id/redo", post(handlers::handle_redo))
        .with_state(state)
}
