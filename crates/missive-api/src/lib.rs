pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod threads;
pub mod users;

use axum::{
    Json, Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
};
use serde_json::{Value, json};

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// All HTTP routes. Auth and health are public; everything else passes
/// authentication, request logging and the admission pipeline, in that order.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let gated_routes = Router::new()
        .route("/messages", post(messages::send_message).get(messages::list_messages))
        .route("/messages/unread", get(messages::unread_messages))
        .route("/messages/{message_id}", patch(messages::edit_message))
        .route("/messages/{message_id}/history", get(messages::message_history))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route("/messages/{message_id}/thread", get(threads::get_thread))
        .route("/inbox", get(threads::get_inbox))
        .route("/notifications", get(notifications::list_notifications))
        .route("/users/me", delete(users::delete_me))
        .layer(from_fn_with_state(state.clone(), middleware::admit))
        .layer(from_fn(middleware::log_requests))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate));

    Router::new()
        .merge(public_routes)
        .merge(gated_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
