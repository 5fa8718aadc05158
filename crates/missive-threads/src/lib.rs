//! Reply-tree and inbox views over persisted messages.
//!
//! Both views cost a fixed number of store calls: a conversation is fetched
//! whole through its precomputed root and then walked in memory, and inbox
//! roots get their newest replies in one batched lookup.

mod store;

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use missive_types::models::{InboxEntry, Message};

/// Read access the reconstructor needs from persistence.
pub trait MessageStore: Send + Sync {
    fn message(&self, id: Uuid) -> anyhow::Result<Option<Message>>;

    /// Every message of the conversation `message_id` belongs to: its root
    /// and all replies whose parent chain ends at that root.
    fn conversation_containing(&self, message_id: Uuid) -> anyhow::Result<Vec<Message>>;

    /// Root messages (no parent) that `user_id` sent or received.
    fn roots_involving(&self, user_id: Uuid) -> anyhow::Result<Vec<Message>>;

    /// For each given root, its newest reply keyed by root id. Roots with no
    /// replies are missing from the map.
    fn latest_replies(&self, root_ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, Message>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("not found")]
    NotFound,

    #[error("service unavailable")]
    Unavailable(anyhow::Error),
}

pub struct ThreadReconstructor<S> {
    store: S,
}

impl<S: MessageStore> ThreadReconstructor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `message_id` and everything that replies to it, directly or not,
    /// oldest first. Only the receiver of `message_id` may view it; the
    /// replies beneath inherit that permission.
    pub fn get_thread(&self, message_id: Uuid, viewer: Uuid) -> Result<Vec<Message>, ThreadError> {
        let anchor = self
            .store
            .message(message_id)
            .map_err(ThreadError::Unavailable)?
            .ok_or(ThreadError::NotFound)?;

        if anchor.receiver_id != viewer {
            debug!(%message_id, %viewer, "thread requested by non-recipient");
            return Err(ThreadError::NotFound);
        }

        let conversation = self
            .store
            .conversation_containing(anchor.id)
            .map_err(ThreadError::Unavailable)?;

        let mut thread = collect_subtree(anchor.id, conversation);
        if thread.is_empty() {
            return Err(ThreadError::NotFound);
        }
        sort_chronologically(&mut thread);
        Ok(thread)
    }

    /// Every conversation `user` takes part in, paired with its newest reply,
    /// most recently active first.
    pub fn get_inbox(&self, user: Uuid) -> Result<Vec<InboxEntry>, ThreadError> {
        let roots = self.store.roots_involving(user).map_err(ThreadError::Unavailable)?;
        let root_ids: Vec<Uuid> = roots.iter().map(|m| m.id).collect();
        let mut latest = self.store.latest_replies(&root_ids).map_err(ThreadError::Unavailable)?;

        let mut inbox: Vec<InboxEntry> = roots
            .into_iter()
            .map(|root| {
                let latest_reply = latest.remove(&root.id);
                let last_activity = latest_reply
                    .as_ref()
                    .map_or(root.sent_at, |reply| reply.sent_at.max(root.sent_at));
                InboxEntry {
                    root,
                    latest_reply,
                    last_activity,
                }
            })
            .collect();

        inbox.sort_by_key(|entry| (Reverse(entry.last_activity), entry.root.id));
        Ok(inbox)
    }
}

/// Picks `anchor` and its descendants from a conversation's messages.
fn collect_subtree(anchor: Uuid, conversation: Vec<Message>) -> Vec<Message> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for message in &conversation {
        if let Some(parent) = message.parent_id {
            children.entry(parent).or_default().push(message.id);
        }
    }

    let mut reachable: HashSet<Uuid> = HashSet::new();
    let mut pending = vec![anchor];
    while let Some(id) = pending.pop() {
        if reachable.insert(id) {
            if let Some(kids) = children.get(&id) {
                pending.extend(kids.iter().copied());
            }
        }
    }

    conversation
        .into_iter()
        .filter(|message| reachable.contains(&message.id))
        .collect()
}

fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
}
