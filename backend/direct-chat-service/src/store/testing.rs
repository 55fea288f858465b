//! Store wrappers that fail selected writes, for exercising partial-failure paths.

use super::{ConversationStore, MemoryStore, MessageStore};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationKey, ConversationUpsert, Message, NewMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Delegates to a `MemoryStore`, failing the Nth `save_message` (1-based)
/// and, when armed, every conversation upsert.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_save_on: Option<usize>,
    saves: AtomicUsize,
    fail_upserts: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_save_on: None,
            saves: AtomicUsize::new(0),
            fail_upserts: AtomicBool::new(false),
        }
    }

    pub fn failing_save(mut self, nth: usize) -> Self {
        self.fail_save_on = Some(nth);
        self
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }
}

fn injected() -> AppError {
    AppError::Persistence("injected write failure".into())
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert_message(&self, new_message: NewMessage) -> AppResult<Message> {
        self.inner.insert_message(new_message).await
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.inner.get_message(id).await
    }

    async fn save_message(&self, message: &Message) -> AppResult<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_save_on == Some(n) {
            return Err(injected());
        }
        self.inner.save_message(message).await
    }

    async fn remove_message(&self, id: Uuid) -> AppResult<()> {
        self.inner.remove_message(id).await
    }

    async fn list_visible(
        &self,
        key: &ConversationKey,
        viewer_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        self.inner.list_visible(key, viewer_id, limit).await
    }

    async fn pending_for(&self, receiver_id: Uuid) -> AppResult<Vec<Message>> {
        self.inner.pending_for(receiver_id).await
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn upsert_conversation(&self, upsert: ConversationUpsert) -> AppResult<Conversation> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.upsert_conversation(upsert).await
    }

    async fn get_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        self.inner.get_conversation(key).await
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Conversation>> {
        self.inner.list_conversations(user_id, limit).await
    }
}
