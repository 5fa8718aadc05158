use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use missive_db::format_timestamp;
use missive_db::models::{MessageQuery, NewMessage};
use missive_guard::{Rejection, Requester};
use missive_types::api::{EditMessageRequest, MessageFilter, SendMessageRequest};
use missive_types::models::{Message, MessageEdit};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

const MAX_BODY_CHARS: usize = 4000;
const RECENT_WINDOW_HOURS: i64 = 24;

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(state.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
}

fn validate_body(body: &str) -> Result<(), ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("message body must not be empty"));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::BadRequest("message body is too long"));
    }
    Ok(())
}

/// Load a message the requester takes part in. Anything else is reported
/// as missing so message ids cannot be enumerated.
fn load_visible(state: &AppStateInner, message_id: Uuid, requester: &Requester) -> Result<Message, ApiError> {
    let row = state
        .db
        .get_message(&message_id.to_string())?
        .ok_or(ApiError::NotFound)?;
    let message = Message::try_from(row)?;

    if !message.involves(requester.user_id) {
        return Err(ApiError::NotFound);
    }
    Ok(message)
}

/// POST /messages: Send a message, or reply when `parent_id` is set.
/// The receiver's notification is written in the same transaction.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_body(&req.body)?;

    let message = blocking(&state, move |state| {
        if state.db.get_user_by_id(&requester.user_id.to_string())?.is_none() {
            return Err(Rejection::Unauthorized.into());
        }
        if state.db.get_user_by_id(&req.receiver_id.to_string())?.is_none() {
            return Err(ApiError::NotFound);
        }
        if let Some(parent_id) = req.parent_id {
            let parent = load_visible(state, parent_id, &requester)?;
            let counterpart = if parent.sender_id == requester.user_id {
                parent.receiver_id
            } else {
                parent.sender_id
            };
            if req.receiver_id != counterpart {
                return Err(ApiError::BadRequest("a reply must go to the other participant of its parent"));
            }
        }

        let id = Uuid::new_v4().to_string();
        let parent_id = req.parent_id.map(|p| p.to_string());
        let row = state.db.insert_message(&NewMessage {
            id: &id,
            sender_id: &requester.user_id.to_string(),
            receiver_id: &req.receiver_id.to_string(),
            body: &req.body,
            sent_at: &format_timestamp(chrono::Utc::now()),
            parent_id: parent_id.as_deref(),
            notification_id: &Uuid::new_v4().to_string(),
        })?;

        Ok(Message::try_from(row)?)
    })
    .await?;

    info!(
        message_id = %message.id,
        sender = %message.sender_id,
        receiver = %message.receiver_id,
        reply = message.parent_id.is_some(),
        "message sent"
    );

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages: Messages the requester sent or received, newest first,
/// narrowed by the optional filters. `last_24h` tightens `since`.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Query(filter): Query<MessageFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let mut since = filter.since;
    if filter.last_24h {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(RECENT_WINDOW_HOURS);
        since = Some(since.map_or(cutoff, |s| s.max(cutoff)));
    }

    let messages = blocking(&state, move |state| {
        let participant = requester.user_id.to_string();
        let sender_id = filter.sender.map(|id| id.to_string());
        let receiver_id = filter.receiver.map(|id| id.to_string());
        let since = since.map(format_timestamp);
        let until = filter.until.map(format_timestamp);

        let rows = state.db.find_messages(&MessageQuery {
            participant: &participant,
            sender_id: sender_id.as_deref(),
            receiver_id: receiver_id.as_deref(),
            since: since.as_deref(),
            until: until.as_deref(),
        })?;
        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(messages)
    })
    .await?;

    Ok(Json(messages))
}

/// GET /messages/unread: Unread messages addressed to the requester, newest first.
pub async fn unread_messages(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = blocking(&state, move |state| {
        let rows = state.db.get_unread_messages(&requester.user_id.to_string())?;
        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(messages)
    })
    .await?;

    Ok(Json(messages))
}

/// PATCH /messages/{message_id}: Only the sender may edit; the replaced
/// body is kept in the message history.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(requester): Extension<Requester>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_body(&req.body)?;

    let message = blocking(&state, move |state| {
        let message = load_visible(state, message_id, &requester)?;
        if message.sender_id != requester.user_id {
            return Err(ApiError::NotSender);
        }

        let row = state
            .db
            .edit_message(
                &message_id.to_string(),
                &req.body,
                &Uuid::new_v4().to_string(),
                &format_timestamp(chrono::Utc::now()),
            )?
            .ok_or(ApiError::NotFound)?;

        Ok(Message::try_from(row)?)
    })
    .await?;

    Ok(Json(message))
}

/// GET /messages/{message_id}/history: Earlier bodies, oldest first.
pub async fn message_history(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(requester): Extension<Requester>,
) -> Result<impl IntoResponse, ApiError> {
    let history = blocking(&state, move |state| {
        load_visible(state, message_id, &requester)?;
        let edits = state
            .db
            .get_message_history(&message_id.to_string())?
            .into_iter()
            .map(MessageEdit::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(edits)
    })
    .await?;

    Ok(Json(history))
}

/// POST /messages/{message_id}/read: Receiver only. Clears the matching
/// notifications too.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(requester): Extension<Requester>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |state| {
        let message = load_visible(state, message_id, &requester)?;
        if message.receiver_id != requester.user_id {
            return Err(ApiError::NotFound);
        }
        state.db.mark_message_read(&message_id.to_string())?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({ "read": true })))
}
