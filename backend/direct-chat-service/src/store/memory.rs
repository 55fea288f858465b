use super::{newest_first, ConversationStore, MessageStore, PresenceStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationKey, ConversationUpsert, Message, MessageStatus, NewMessage,
    UserPresence,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use uuid::Uuid;

/// In-process store backed by DashMap shards.
///
/// `set_unavailable(true)` makes every call fail with `Persistence`, which is
/// how tests exercise the store-failure paths.
#[derive(Default)]
pub struct MemoryStore {
    messages: DashMap<Uuid, Message>,
    by_conversation: DashMap<ConversationKey, Vec<Uuid>>,
    conversations: DashMap<ConversationKey, Conversation>,
    presence: DashMap<Uuid, UserPresence>,
    next_sequence: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, new_message: NewMessage) -> AppResult<Message> {
        self.check_available()?;
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = new_message.into_message(Uuid::new_v4(), sequence_number);

        self.messages.insert(message.id, message.clone());
        self.by_conversation
            .entry(message.conversation_key.clone())
            .or_default()
            .push(message.id);
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.check_available()?;
        Ok(self.messages.get(&id).map(|m| m.value().clone()))
    }

    async fn save_message(&self, message: &Message) -> AppResult<()> {
        self.check_available()?;
        match self.messages.get_mut(&message.id) {
            Some(mut stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(AppError::NotFound),
        }
    }

    async fn remove_message(&self, id: Uuid) -> AppResult<()> {
        self.check_available()?;
        let (_, message) = self.messages.remove(&id).ok_or(AppError::NotFound)?;
        if let Some(mut ids) = self.by_conversation.get_mut(&message.conversation_key) {
            ids.retain(|existing| *existing != id);
        }
        Ok(())
    }

    async fn list_visible(
        &self,
        key: &ConversationKey,
        viewer_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        self.check_available()?;
        let ids = match self.by_conversation.get(key) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };

        let mut visible: Vec<Message> = ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.value().clone()))
            .filter(|m| m.is_visible_to(viewer_id))
            .collect();
        visible.sort_by(newest_first);
        visible.truncate(limit);
        Ok(visible)
    }

    async fn pending_for(&self, receiver_id: Uuid) -> AppResult<Vec<Message>> {
        self.check_available()?;
        let mut pending: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.receiver_id == receiver_id && m.status == MessageStatus::Sent)
            .map(|m| m.value().clone())
            .collect();
        pending.sort_by_key(|m| m.sequence_number);
        Ok(pending)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn upsert_conversation(&self, upsert: ConversationUpsert) -> AppResult<Conversation> {
        self.check_available()?;
        let conversation = self
            .conversations
            .entry(upsert.key.clone())
            .and_modify(|existing| upsert.apply_to(existing))
            .or_insert_with(|| upsert.clone().into_new())
            .clone();
        Ok(conversation)
    }

    async fn get_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        self.check_available()?;
        Ok(self.conversations.get(key).map(|c| c.value().clone()))
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Conversation>> {
        self.check_available()?;
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.key.involves(user_id))
            .map(|c| c.value().clone())
            .collect();
        // None sorts before Some, so reversing puts conversations without activity last.
        conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        conversations.truncate(limit);
        Ok(conversations)
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn set_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        self.check_available()?;
        let mut entry = self.presence.entry(user_id).or_insert(UserPresence {
            user_id,
            is_online,
            last_seen: None,
        });
        entry.is_online = is_online;
        if last_seen.is_some() {
            entry.last_seen = last_seen;
        }
        Ok(())
    }

    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<UserPresence>> {
        self.check_available()?;
        Ok(self.presence.get(&user_id).map(|p| p.value().clone()))
    }
}
