//! Database row types. These map directly to SQLite rows.
//! Distinct from missive-types models to keep the DB layer independent;
//! the `TryFrom` impls below are the only bridge between the two.

use anyhow::{Result, anyhow};
use uuid::Uuid;

use missive_types::models::{Message, MessageEdit, Notification, Role, User};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub sent_at: String,
    pub read: bool,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub parent_id: Option<String>,
    pub thread_root_id: Option<String>,
}

impl MessageRow {
    /// Id of the conversation root: the thread root for replies, the
    /// message itself for roots.
    pub fn conversation_id(&self) -> &str {
        self.thread_root_id.as_deref().unwrap_or(&self.id)
    }
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub read: bool,
    pub created_at: String,
}

pub struct HistoryRow {
    pub id: String,
    pub message_id: String,
    pub previous_body: String,
    pub replaced_at: String,
}

/// Insert payload for `Database::insert_message`.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub body: &'a str,
    pub sent_at: &'a str,
    pub parent_id: Option<&'a str>,
    pub notification_id: &'a str,
}

/// Filters for `Database::find_messages`. Results are always limited to
/// messages `participant` sent or received.
pub struct MessageQuery<'a> {
    pub participant: &'a str,
    pub sender_id: Option<&'a str>,
    pub receiver_id: Option<&'a str>,
    pub since: Option<&'a str>,
    pub until: Option<&'a str>,
}

fn parse_id(raw: &str, field: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| anyhow!("Corrupt {} '{}': {}", field, raw, e))
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id, "user id")?,
            role: row.role.parse::<Role>()?,
            created_at: parse_timestamp(&row.created_at)?,
            username: row.username,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_id(&row.id, "message id")?,
            sender_id: parse_id(&row.sender_id, "sender_id")?,
            receiver_id: parse_id(&row.receiver_id, "receiver_id")?,
            sent_at: parse_timestamp(&row.sent_at)?,
            read: row.read,
            edited: row.edited,
            edited_at: row.edited_at.as_deref().map(parse_timestamp).transpose()?,
            parent_id: row
                .parent_id
                .as_deref()
                .map(|p| parse_id(p, "parent_id"))
                .transpose()?,
            body: row.body,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: parse_id(&row.id, "notification id")?,
            user_id: parse_id(&row.user_id, "user_id")?,
            message_id: parse_id(&row.message_id, "message_id")?,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<HistoryRow> for MessageEdit {
    type Error = anyhow::Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(MessageEdit {
            id: parse_id(&row.id, "history id")?,
            message_id: parse_id(&row.message_id, "message_id")?,
            replaced_at: parse_timestamp(&row.replaced_at)?,
            previous_body: row.previous_body,
        })
    }
}
