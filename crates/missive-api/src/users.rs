use axum::{Extension, extract::State, http::StatusCode};
use tracing::info;

use missive_guard::Requester;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::messages::blocking;

/// DELETE /users/me: Removes the account. Messages sent or received by it,
/// replies under those messages, and notifications go with it.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<StatusCode, ApiError> {
    let user_id = requester.user_id;
    let deleted = blocking(&state, move |state| {
        Ok(state.db.delete_user(&user_id.to_string())?)
    })
    .await?;

    if !deleted {
        return Err(ApiError::NotFound);
    }

    info!("Deleted account {} ({})", requester.username, user_id);
    Ok(StatusCode::NO_CONTENT)
}
