use crate::config::LifecyclePolicy;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    ConversationKey, DeleteRequest, DeleteScope, Message, MessageStatus, NewMessage,
};
use crate::services::clock::Clock;
use crate::services::conversation_service::ConversationService;
use crate::services::keyed_lock::KeyedMutex;
use crate::store::MessageStore;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Result of a batch `mark_seen`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenOutcome {
    /// Messages whose status moved to `seen`
    pub changed: Vec<Message>,
    /// Distinct senders of the changed messages
    pub senders: BTreeSet<Uuid>,
}

/// Message lifecycle: creation, delivery state, edit and soft delete.
///
/// Every read-modify-write of a message holds that message's lock, so
/// concurrent transitions on one message are linearized while other messages
/// proceed independently.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    conversations: ConversationService,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    locks: KeyedMutex<Uuid>,
    max_body_len: usize,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        conversations: ConversationService,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
        max_body_len: usize,
    ) -> Self {
        Self {
            store,
            conversations,
            clock,
            policy,
            locks: KeyedMutex::new(),
            max_body_len,
        }
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    fn validate_body(&self, body: &str) -> AppResult<()> {
        if body.trim().is_empty() {
            return Err(AppError::BadRequest("message body is empty".into()));
        }
        if body.chars().count() > self.max_body_len {
            return Err(AppError::BadRequest(format!(
                "message body exceeds {} characters",
                self.max_body_len
            )));
        }
        Ok(())
    }

    pub async fn get_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        self.store.get_message(message_id).await
    }

    pub async fn create_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        body: String,
        reply_to: Option<Uuid>,
    ) -> AppResult<Message> {
        self.validate_body(&body)?;
        let key = ConversationKey::for_pair(sender_id, receiver_id);

        if let Some(reply_id) = reply_to {
            match self.store.get_message(reply_id).await? {
                None => {
                    return Err(AppError::InvalidReference(format!(
                        "reply_to {reply_id} does not exist"
                    )))
                }
                Some(referenced) if referenced.conversation_key != key => {
                    return Err(AppError::InvalidReference(format!(
                        "reply_to {reply_id} belongs to another conversation"
                    )))
                }
                Some(_) => {}
            }
        }

        let message = self
            .store
            .insert_message(NewMessage {
                conversation_key: key.clone(),
                sender_id,
                receiver_id,
                body,
                reply_to,
                created_at: self.clock.now(),
            })
            .await?;

        if let Err(e) = self
            .conversations
            .upsert(&key, (sender_id, receiver_id), message.id, message.created_at)
            .await
        {
            // Nobody has seen the message yet; undo the insert so the send fails whole.
            if let Err(undo) = self.store.remove_message(message.id).await {
                tracing::error!(
                    message_id = %message.id,
                    error = %undo,
                    "failed to remove message after conversation update failed"
                );
            }
            return Err(e);
        }

        tracing::info!(
            message_id = %message.id,
            conversation_key = %key,
            sender_id = %sender_id,
            "message created"
        );
        Ok(message)
    }

    /// `sent -> delivered`. Returns `None` when the message was already
    /// delivered or seen.
    pub async fn mark_delivered(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let _guard = self.locks.lock(message_id).await;
        let mut message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if !message.advance_status(MessageStatus::Delivered) {
            return Ok(None);
        }
        self.store.save_message(&message).await?;
        Ok(Some(message))
    }

    /// Receiver acknowledgement for a batch. Unknown ids and messages not
    /// addressed to `receiver_id` are skipped.
    pub async fn mark_delivered_for(
        &self,
        message_ids: &[Uuid],
        receiver_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        self.advance_batch(message_ids, receiver_id, MessageStatus::Delivered)
            .await
    }

    /// Move every message addressed to `viewer_id` to `seen`.
    pub async fn mark_seen(&self, message_ids: &[Uuid], viewer_id: Uuid) -> AppResult<SeenOutcome> {
        let changed = self
            .advance_batch(message_ids, viewer_id, MessageStatus::Seen)
            .await?;
        let senders = changed.iter().map(|m| m.sender_id).collect();
        Ok(SeenOutcome { changed, senders })
    }

    /// Advance each message in turn. A failing item is logged and skipped;
    /// the ones already persisted are still returned so they get announced.
    /// The error surfaces only when nothing in the batch was applied.
    async fn advance_batch(
        &self,
        message_ids: &[Uuid],
        receiver_id: Uuid,
        target: MessageStatus,
    ) -> AppResult<Vec<Message>> {
        let mut seen_ids = HashSet::new();
        let mut changed = Vec::new();
        let mut failure = None;

        for &message_id in message_ids {
            if !seen_ids.insert(message_id) {
                continue;
            }
            match self.advance_one(message_id, receiver_id, target).await {
                Ok(Some(message)) => changed.push(message),
                Ok(None) => {}
                Err(e) => {
                    metrics::record_error(e.code());
                    tracing::warn!(
                        message_id = %message_id,
                        status = target.as_str(),
                        error = %e,
                        "status update not applied"
                    );
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) if changed.is_empty() => Err(e),
            _ => Ok(changed),
        }
    }

    async fn advance_one(
        &self,
        message_id: Uuid,
        receiver_id: Uuid,
        target: MessageStatus,
    ) -> AppResult<Option<Message>> {
        let _guard = self.locks.lock(message_id).await;
        let Some(mut message) = self.store.get_message(message_id).await? else {
            tracing::debug!(message_id = %message_id, "status update for unknown message skipped");
            return Ok(None);
        };
        if message.receiver_id != receiver_id || !message.advance_status(target) {
            return Ok(None);
        }
        self.store.save_message(&message).await?;
        Ok(Some(message))
    }

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        new_body: String,
        requester_id: Uuid,
    ) -> AppResult<Message> {
        self.validate_body(&new_body)?;

        let _guard = self.locks.lock(message_id).await;
        let mut message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if message.sender_id != requester_id {
            return Err(AppError::Unauthorized);
        }
        if !self.policy.edit_after_delete && message.delete_scope != DeleteScope::None {
            return Err(AppError::PolicyViolation(
                "cannot edit a deleted message".into(),
            ));
        }
        if !self.policy.edit_after_seen && message.status == MessageStatus::Seen {
            return Err(AppError::PolicyViolation(
                "cannot edit a message that was already seen".into(),
            ));
        }

        message.apply_edit(new_body, self.clock.now());
        self.store.save_message(&message).await?;

        tracing::info!(message_id = %message_id, "message edited");
        Ok(message)
    }

    pub async fn delete_message(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        request: DeleteRequest,
    ) -> AppResult<Message> {
        let _guard = self.locks.lock(message_id).await;
        let mut message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if !message.is_participant(requester_id) {
            return Err(AppError::Unauthorized);
        }
        if request == DeleteRequest::ForBoth {
            if message.sender_id != requester_id {
                return Err(AppError::Unauthorized);
            }
            if !self.policy.delete_after_seen && message.status == MessageStatus::Seen {
                return Err(AppError::PolicyViolation(
                    "cannot delete a seen message for both participants".into(),
                ));
            }
        }

        if message.apply_delete(requester_id, request) {
            self.store.save_message(&message).await?;
            tracing::info!(
                message_id = %message_id,
                scope = message.delete_scope.as_str(),
                "message deleted"
            );
        }
        Ok(message)
    }

    /// Backlog of `sent` messages addressed to `receiver_id`, oldest first.
    pub async fn pending_for(&self, receiver_id: Uuid) -> AppResult<Vec<Message>> {
        self.store.pending_for(receiver_id).await
    }
}
