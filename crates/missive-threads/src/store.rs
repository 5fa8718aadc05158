use std::collections::HashMap;

use anyhow::Result;
use uuid::Uuid;

use missive_db::Database;
use missive_db::models::MessageRow;
use missive_types::models::Message;

use crate::MessageStore;

impl MessageStore for Database {
    fn message(&self, id: Uuid) -> Result<Option<Message>> {
        self.get_message(&id.to_string())?
            .map(Message::try_from)
            .transpose()
    }

    fn conversation_containing(&self, message_id: Uuid) -> Result<Vec<Message>> {
        into_messages(self.get_conversation_containing(&message_id.to_string())?)
    }

    fn roots_involving(&self, user_id: Uuid) -> Result<Vec<Message>> {
        into_messages(self.get_root_messages_for_user(&user_id.to_string())?)
    }

    fn latest_replies(&self, root_ids: &[Uuid]) -> Result<HashMap<Uuid, Message>> {
        let ids: Vec<String> = root_ids.iter().map(Uuid::to_string).collect();

        let mut latest = HashMap::with_capacity(ids.len());
        for row in self.get_latest_replies(&ids)? {
            let root_id: Uuid = row.conversation_id().parse()?;
            latest.insert(root_id, Message::try_from(row)?);
        }
        Ok(latest)
    }
}

impl<S: MessageStore + ?Sized> MessageStore for &S {
    fn message(&self, id: Uuid) -> Result<Option<Message>> {
        (**self).message(id)
    }

    fn conversation_containing(&self, message_id: Uuid) -> Result<Vec<Message>> {
        (**self).conversation_containing(message_id)
    }

    fn roots_involving(&self, user_id: Uuid) -> Result<Vec<Message>> {
        (**self).roots_involving(user_id)
    }

    fn latest_replies(&self, root_ids: &[Uuid]) -> Result<HashMap<Uuid, Message>> {
        (**self).latest_replies(root_ids)
    }
}

fn into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThreadReconstructor;
    use missive_db::format_timestamp;
    use missive_db::models::NewMessage;
    use chrono::{TimeZone, Utc};

    struct Seeded {
        db: Database,
        alice: Uuid,
        bob: Uuid,
    }

    fn seeded() -> Seeded {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let created = format_timestamp(Utc::now());
        db.create_user(&alice.to_string(), "alice", "hash", "admin", &created).unwrap();
        db.create_user(&bob.to_string(), "bob", "hash", "moderator", &created).unwrap();
        Seeded { db, alice, bob }
    }

    fn send(db: &Database, from: Uuid, to: Uuid, second: u32, parent: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        let sent_at = format_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, second).unwrap());
        let parent = parent.map(|p| p.to_string());
        db.insert_message(&NewMessage {
            id: &id.to_string(),
            sender_id: &from.to_string(),
            receiver_id: &to.to_string(),
            body: "hey",
            sent_at: &sent_at,
            parent_id: parent.as_deref(),
            notification_id: &Uuid::new_v4().to_string(),
        })
        .unwrap();
        id
    }

    #[test]
    fn thread_over_sqlite_is_time_ordered() {
        let s = seeded();
        let r = send(&s.db, s.alice, s.bob, 0, None);
        let a = send(&s.db, s.bob, s.alice, 2, Some(r));
        let b = send(&s.db, s.alice, s.bob, 3, Some(a));
        let c = send(&s.db, s.bob, s.alice, 1, Some(r));

        let threads = ThreadReconstructor::new(&s.db);
        let ids: Vec<Uuid> = threads
            .get_thread(r, s.bob)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![r, c, a, b]);

        let from_reply: Vec<Uuid> = threads
            .get_thread(b, s.bob)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(from_reply, vec![b]);
    }

    #[test]
    fn inbox_over_sqlite_attaches_latest_reply() {
        let s = seeded();
        let old = send(&s.db, s.alice, s.bob, 0, None);
        let newer_root = send(&s.db, s.bob, s.alice, 5, None);
        let reply = send(&s.db, s.bob, s.alice, 9, Some(old));

        let inbox = ThreadReconstructor::new(&s.db).get_inbox(s.alice).unwrap();
        let roots: Vec<Uuid> = inbox.iter().map(|e| e.root.id).collect();
        assert_eq!(roots, vec![old, newer_root]);
        assert_eq!(inbox[0].latest_reply.as_ref().map(|m| m.id), Some(reply));
        assert!(inbox[1].latest_reply.is_none());
    }
}
