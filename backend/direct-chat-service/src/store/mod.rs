//! Persistence seam for the messaging engine.
//!
//! Services only talk to these traits. `MemoryStore` backs tests and
//! single-process runs; `PgStore` is the durable adapter.

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub(crate) mod testing;

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationKey, ConversationUpsert, Message, NewMessage, UserPresence,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Message records and their lifecycle fields.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and sequence number.
    async fn insert_message(&self, new_message: NewMessage) -> AppResult<Message>;

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Overwrite the mutable lifecycle fields of an existing message
    /// (status, body, edit markers, delete scope).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the message does not exist.
    async fn save_message(&self, message: &Message) -> AppResult<()>;

    /// Hard-remove a message. Only used to undo an insert whose send failed
    /// before anyone could observe it.
    async fn remove_message(&self, id: Uuid) -> AppResult<()>;

    /// Newest-first page of messages in `key` that `viewer_id` may see.
    async fn list_visible(
        &self,
        key: &ConversationKey,
        viewer_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Message>>;

    /// Messages addressed to `receiver_id` still in `sent`, oldest first.
    async fn pending_for(&self, receiver_id: Uuid) -> AppResult<Vec<Message>>;
}

/// Conversation index keyed by `ConversationKey`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create-or-update. Never moves `last_message_at` backwards.
    async fn upsert_conversation(&self, upsert: ConversationUpsert) -> AppResult<Conversation>;

    async fn get_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>>;

    /// Conversations involving `user_id`, most recent activity first.
    async fn list_conversations(&self, user_id: Uuid, limit: usize)
        -> AppResult<Vec<Conversation>>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<UserPresence>>;
}

/// Trait-object handles for every store the service needs.
#[derive(Clone)]
pub struct Stores {
    pub messages: Arc<dyn MessageStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub presence: Arc<dyn PresenceStore>,
}

impl Stores {
    /// Use one backend for all three concerns.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: MessageStore + ConversationStore + PresenceStore + 'static,
    {
        Self {
            messages: store.clone(),
            conversations: store.clone(),
            presence: store,
        }
    }
}

/// Newest-first ordering used by every `list_visible` implementation.
pub(crate) fn newest_first(a: &Message, b: &Message) -> std::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then(b.sequence_number.cmp(&a.sequence_number))
}
