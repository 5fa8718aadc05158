use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use missive_guard::Requester;
use missive_threads::ThreadReconstructor;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::messages::blocking;

/// GET /messages/{message_id}/thread: The message and every reply under
/// it, oldest first. Only the message's receiver may load it.
pub async fn get_thread(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(requester): Extension<Requester>,
) -> Result<impl IntoResponse, ApiError> {
    let thread = blocking(&state, move |state| {
        Ok(ThreadReconstructor::new(&state.db).get_thread(message_id, requester.user_id)?)
    })
    .await?;

    Ok(Json(thread))
}

/// GET /inbox: One entry per conversation, most recent activity first.
pub async fn get_inbox(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<impl IntoResponse, ApiError> {
    let inbox = blocking(&state, move |state| {
        Ok(ThreadReconstructor::new(&state.db).get_inbox(requester.user_id)?)
    })
    .await?;

    Ok(Json(inbox))
}
