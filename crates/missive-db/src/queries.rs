use crate::models::{HistoryRow, MessageQuery, MessageRow, NewMessage, NotificationRow, UserRow};
use crate::Database;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, body, sent_at, read, edited, edited_at, parent_id, thread_root_id";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        role: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, password_hash, role, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Deletes a user. Their sent and received messages, the replies under
    /// those messages, notifications and edit history go with them.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    // -- Messages --

    /// Persists a message and the receiver's notification in one transaction.
    /// For replies the conversation root is resolved from the parent here,
    /// so `thread_root_id` is always set at creation and never changes.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let thread_root_id = match msg.parent_id {
                Some(parent_id) => {
                    let root: Option<String> = tx
                        .query_row(
                            "SELECT COALESCE(thread_root_id, id) FROM messages WHERE id = ?1",
                            [parent_id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    Some(root.ok_or_else(|| anyhow!("Parent message not found: {}", parent_id))?)
                }
                None => None,
            };

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, sent_at, parent_id, thread_root_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.body,
                    msg.sent_at,
                    msg.parent_id,
                    thread_root_id,
                ],
            )?;

            tx.execute(
                "INSERT INTO notifications (id, user_id, message_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                (msg.notification_id, msg.receiver_id, msg.id, msg.sent_at),
            )?;

            tx.commit()?;

            Ok(MessageRow {
                id: msg.id.to_string(),
                sender_id: msg.sender_id.to_string(),
                receiver_id: msg.receiver_id.to_string(),
                body: msg.body.to_string(),
                sent_at: msg.sent_at.to_string(),
                read: false,
                edited: false,
                edited_at: None,
                parent_id: msg.parent_id.map(str::to_string),
                thread_root_id,
            })
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let row = conn.query_row(&sql, [id], map_message_row).optional()?;
            Ok(row)
        })
    }

    /// The root and every reply of the conversation `message_id` belongs
    /// to, in one query. Empty if the message does not exist.
    pub fn get_conversation_containing(&self, message_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "WITH root AS (
                     SELECT COALESCE(thread_root_id, id) AS id FROM messages WHERE id = ?1
                 )
                 SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE id = (SELECT id FROM root) OR thread_root_id = (SELECT id FROM root)
                 ORDER BY sent_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([message_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_root_messages_for_user(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE parent_id IS NULL AND (sender_id = ?1 OR receiver_id = ?1)
                 ORDER BY sent_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch the newest reply of each given conversation root.
    /// Roots without replies are simply absent from the result.
    pub fn get_latest_replies(&self, root_ids: &[String]) -> Result<Vec<MessageRow>> {
        if root_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=root_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                     SELECT {MESSAGE_COLUMNS},
                            ROW_NUMBER() OVER (
                                PARTITION BY thread_root_id
                                ORDER BY sent_at DESC, id DESC
                            ) AS rn
                     FROM messages
                     WHERE thread_root_id IN ({})
                 )
                 WHERE rn = 1",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = root_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Messages the participant sent or received, newest first, narrowed by
    /// whichever filters are set. Timestamp bounds are inclusive.
    pub fn find_messages(&self, query: &MessageQuery<'_>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut clauses = vec!["(sender_id = ?1 OR receiver_id = ?1)".to_string()];
            let mut params: Vec<&str> = vec![query.participant];

            let filters = [
                ("sender_id =", query.sender_id),
                ("receiver_id =", query.receiver_id),
                ("sent_at >=", query.since),
                ("sent_at <=", query.until),
            ];
            for (condition, value) in filters {
                if let Some(value) = value {
                    params.push(value);
                    clauses.push(format!("{} ?{}", condition, params.len()));
                }
            }

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {} ORDER BY sent_at DESC, id DESC",
                clauses.join(" AND ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_unread_messages(&self, receiver_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver_id = ?1 AND read = 0
                 ORDER BY sent_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([receiver_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks a message and the notifications pointing at it as read.
    pub fn mark_message_read(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute("UPDATE messages SET read = 1 WHERE id = ?1", [id])?;
            tx.execute("UPDATE notifications SET read = 1 WHERE message_id = ?1", [id])?;
            tx.commit()?;
            Ok(updated > 0)
        })
    }

    /// Replaces a message body, keeping the old one in `message_history`.
    /// Returns the updated row, or `None` if the message does not exist.
    pub fn edit_message(
        &self,
        id: &str,
        body: &str,
        history_id: &str,
        edited_at: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let previous: Option<String> = tx
                .query_row("SELECT body FROM messages WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            let Some(previous) = previous else {
                return Ok(None);
            };

            tx.execute(
                "INSERT INTO message_history (id, message_id, previous_body, replaced_at) VALUES (?1, ?2, ?3, ?4)",
                (history_id, id, &previous, edited_at),
            )?;
            tx.execute(
                "UPDATE messages SET body = ?2, edited = 1, edited_at = ?3 WHERE id = ?1",
                (id, body, edited_at),
            )?;

            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let row = tx.query_row(&sql, [id], map_message_row)?;

            tx.commit()?;
            Ok(Some(row))
        })
    }

    pub fn get_message_history(&self, message_id: &str) -> Result<Vec<HistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, previous_body, replaced_at FROM message_history
                 WHERE message_id = ?1
                 ORDER BY replaced_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        previous_body: row.get(2)?,
                        replaced_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn get_notifications(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message_id, read, created_at FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        message_id: row.get(2)?,
                        read: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, role, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        body: row.get(3)?,
        sent_at: row.get(4)?,
        read: row.get(5)?,
        edited: row.get(6)?,
        edited_at: row.get(7)?,
        parent_id: row.get(8)?,
        thread_root_id: row.get(9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_users(db: &Database) {
        for (id, name) in [("u-alice", "alice"), ("u-bob", "bob"), ("u-carol", "carol")] {
            db.create_user(id, name, "hash", "member", "2024-01-01T00:00:00.000000Z")
                .unwrap();
        }
    }

    fn send(db: &Database, id: &str, from: &str, to: &str, at: &str, parent: Option<&str>) -> MessageRow {
        let notification_id = format!("n-{id}");
        db.insert_message(&NewMessage {
            id,
            sender_id: from,
            receiver_id: to,
            body: "hi",
            sent_at: at,
            parent_id: parent,
            notification_id: &notification_id,
        })
        .unwrap()
    }

    fn ts(second: u32) -> String {
        format!("2024-01-01T18:00:{second:02}.000000Z")
    }

    #[test]
    fn replies_inherit_thread_root_at_any_depth() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        let root = send(&db, "m-root", "u-alice", "u-bob", &ts(0), None);
        let a = send(&db, "m-a", "u-bob", "u-alice", &ts(2), Some("m-root"));
        let b = send(&db, "m-b", "u-alice", "u-bob", &ts(3), Some("m-a"));

        assert_eq!(root.thread_root_id, None);
        assert_eq!(a.thread_root_id.as_deref(), Some("m-root"));
        assert_eq!(b.thread_root_id.as_deref(), Some("m-root"));
        assert_eq!(b.conversation_id(), "m-root");

        let stored = db.get_message("m-b").unwrap().unwrap();
        assert_eq!(stored.parent_id.as_deref(), Some("m-a"));
        assert_eq!(stored.thread_root_id.as_deref(), Some("m-root"));
    }

    #[test]
    fn reply_to_missing_parent_is_rejected_without_side_effects() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        let notification_id = "n-orphan";
        let result = db.insert_message(&NewMessage {
            id: "m-orphan",
            sender_id: "u-alice",
            receiver_id: "u-bob",
            body: "hello?",
            sent_at: &ts(1),
            parent_id: Some("m-missing"),
            notification_id,
        });

        assert!(result.is_err());
        assert!(db.get_message("m-orphan").unwrap().is_none());
        assert!(db.get_notifications("u-bob").unwrap().is_empty());
    }

    #[test]
    fn conversation_loads_root_and_all_replies() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-root", "u-alice", "u-bob", &ts(0), None);
        send(&db, "m-a", "u-bob", "u-alice", &ts(2), Some("m-root"));
        send(&db, "m-b", "u-alice", "u-bob", &ts(3), Some("m-a"));
        send(&db, "m-c", "u-bob", "u-alice", &ts(1), Some("m-root"));
        send(&db, "m-other", "u-carol", "u-bob", &ts(4), None);

        for anchor in ["m-root", "m-b"] {
            let ids: Vec<String> = db
                .get_conversation_containing(anchor)
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();
            assert_eq!(ids, vec!["m-root", "m-c", "m-a", "m-b"]);
        }
        assert!(db.get_conversation_containing("m-missing").unwrap().is_empty());
    }

    #[test]
    fn latest_replies_picks_newest_per_root() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-r1", "u-alice", "u-bob", &ts(0), None);
        send(&db, "m-r1-a", "u-bob", "u-alice", &ts(5), Some("m-r1"));
        send(&db, "m-r1-b", "u-alice", "u-bob", &ts(9), Some("m-r1-a"));
        send(&db, "m-r2", "u-carol", "u-alice", &ts(1), None);
        send(&db, "m-r2-a", "u-alice", "u-carol", &ts(3), Some("m-r2"));
        send(&db, "m-r3", "u-bob", "u-alice", &ts(2), None);

        let roots = vec!["m-r1".to_string(), "m-r2".to_string(), "m-r3".to_string()];
        let mut latest: Vec<(String, String)> = db
            .get_latest_replies(&roots)
            .unwrap()
            .into_iter()
            .map(|r| (r.conversation_id().to_string(), r.id))
            .collect();
        latest.sort();

        assert_eq!(
            latest,
            vec![
                ("m-r1".to_string(), "m-r1-b".to_string()),
                ("m-r2".to_string(), "m-r2-a".to_string()),
            ]
        );
        assert!(db.get_latest_replies(&[]).unwrap().is_empty());
    }

    #[test]
    fn root_messages_include_sent_and_received() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-1", "u-alice", "u-bob", &ts(0), None);
        send(&db, "m-2", "u-carol", "u-alice", &ts(1), None);
        send(&db, "m-3", "u-bob", "u-carol", &ts(2), None);
        send(&db, "m-1-a", "u-bob", "u-alice", &ts(3), Some("m-1"));

        let ids: Vec<String> = db
            .get_root_messages_for_user("u-alice")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["m-2", "m-1"]);
    }

    #[test]
    fn sending_creates_notification_and_read_clears_it() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-1", "u-alice", "u-bob", &ts(0), None);

        let notifications = db.get_notifications("u-bob").unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].message_id, "m-1");
        assert!(!notifications[0].read);
        assert_eq!(db.get_unread_messages("u-bob").unwrap().len(), 1);

        assert!(db.mark_message_read("m-1").unwrap());
        assert!(db.get_notifications("u-bob").unwrap()[0].read);
        assert!(db.get_unread_messages("u-bob").unwrap().is_empty());
        assert!(!db.mark_message_read("m-missing").unwrap());
    }

    #[test]
    fn edit_keeps_previous_body_in_history() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-1", "u-alice", "u-bob", &ts(0), None);

        let edited = db
            .edit_message("m-1", "hello there", "h-1", &ts(10))
            .unwrap()
            .unwrap();
        assert_eq!(edited.body, "hello there");
        assert!(edited.edited);
        assert_eq!(edited.edited_at, Some(ts(10)));

        let history = db.get_message_history("m-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_body, "hi");

        assert!(db.edit_message("m-missing", "x", "h-2", &ts(11)).unwrap().is_none());
    }

    #[test]
    fn deleting_user_cascades_to_messages_and_notifications() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-1", "u-alice", "u-bob", &ts(0), None);
        send(&db, "m-1-a", "u-bob", "u-carol", &ts(1), Some("m-1"));
        send(&db, "m-2", "u-carol", "u-bob", &ts(2), None);
        db.edit_message("m-1", "edited", "h-1", &ts(3)).unwrap();

        assert!(db.delete_user("u-alice").unwrap());

        assert!(db.get_user_by_id("u-alice").unwrap().is_none());
        assert!(db.get_message("m-1").unwrap().is_none());
        assert!(db.get_message("m-1-a").unwrap().is_none());
        assert!(db.get_message_history("m-1").unwrap().is_empty());
        assert!(db.get_message("m-2").unwrap().is_some());

        let remaining: Vec<String> = db
            .get_notifications("u-bob")
            .unwrap()
            .into_iter()
            .map(|n| n.message_id)
            .collect();
        assert_eq!(remaining, vec!["m-2"]);
        assert!(!db.delete_user("u-alice").unwrap());
    }

    #[test]
    fn find_messages_combines_filters() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        send(&db, "m-1", "u-alice", "u-bob", &ts(0), None);
        send(&db, "m-2", "u-bob", "u-alice", &ts(1), Some("m-1"));
        send(&db, "m-3", "u-carol", "u-alice", &ts(2), None);
        send(&db, "m-4", "u-carol", "u-bob", &ts(3), None);

        let ids = |query: MessageQuery<'_>| -> Vec<String> {
            db.find_messages(&query).unwrap().into_iter().map(|m| m.id).collect()
        };
        let all = MessageQuery {
            participant: "u-alice",
            sender_id: None,
            receiver_id: None,
            since: None,
            until: None,
        };

        assert_eq!(ids(MessageQuery { ..all }), vec!["m-3", "m-2", "m-1"]);
        assert_eq!(ids(MessageQuery { sender_id: Some("u-carol"), ..all }), vec!["m-3"]);
        assert_eq!(ids(MessageQuery { receiver_id: Some("u-alice"), ..all }), vec!["m-3", "m-2"]);
        assert_eq!(
            ids(MessageQuery { since: Some(&ts(1)), until: Some(&ts(2)), ..all }),
            vec!["m-3", "m-2"]
        );
        // Filters never widen past the participant's own messages.
        assert!(ids(MessageQuery { sender_id: Some("u-carol"), receiver_id: Some("u-bob"), ..all }).is_empty());
    }

    #[test]
    fn user_lookup_by_name_and_id() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);

        let bob = db.get_user_by_username("bob").unwrap().unwrap();
        assert_eq!(bob.id, "u-bob");
        assert_eq!(bob.role, "member");
        assert!(db.get_user_by_id("u-nobody").unwrap().is_none());
        assert!(db.create_user("u-bob2", "bob", "hash", "member", &ts(0)).is_err());
    }
}
