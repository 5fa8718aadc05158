use axum::{Extension, Json, extract::State, response::IntoResponse};

use missive_guard::Requester;
use missive_types::models::Notification;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::messages::blocking;

/// GET /notifications: Newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = blocking(&state, move |state| {
        let notifications = state
            .db
            .get_notifications(&requester.user_id.to_string())?
            .into_iter()
            .map(Notification::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(notifications)
    })
    .await?;

    Ok(Json(notifications))
}
