use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationKey, ConversationUpsert};
use crate::store::ConversationStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Conversation index: one summary record per user pair.
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Create-or-update the record for `key`.
    ///
    /// Duplicate or reordered calls are harmless: `last_message_at` only moves
    /// forward.
    pub async fn upsert(
        &self,
        key: &ConversationKey,
        participants: (Uuid, Uuid),
        last_message_id: Uuid,
        last_message_at: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        if ConversationKey::for_pair(participants.0, participants.1) != *key {
            return Err(AppError::BadRequest(format!(
                "participants do not match conversation key {key}"
            )));
        }

        let conversation = self
            .store
            .upsert_conversation(ConversationUpsert {
                key: key.clone(),
                last_message_id,
                last_message_at,
            })
            .await?;

        tracing::debug!(
            conversation_key = %key,
            last_message_id = %last_message_id,
            "conversation upserted"
        );
        Ok(conversation)
    }

    pub async fn get(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        self.store.get_conversation(key).await
    }

    /// Conversations of `user_id` ordered by `last_message_at` descending.
    pub async fn list_for_user(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Conversation>> {
        self.store.list_conversations(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let service = ConversationService::new(Arc::new(MemoryStore::new()));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let key = ConversationKey::for_pair(a, b);
        let now = Utc::now();

        let created = service.upsert(&key, (a, b), Uuid::new_v4(), now).await.unwrap();
        assert_eq!(created.created_at, now);

        let next = Uuid::new_v4();
        let updated = service
            .upsert(&key, (b, a), next, now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(updated.last_message_id, Some(next));
        assert_eq!(updated.created_at, now);
        assert_eq!(service.get(&key).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_upsert_rejects_mismatched_participants() {
        let service = ConversationService::new(Arc::new(MemoryStore::new()));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let key = ConversationKey::for_pair(a, b);
        let err = service
            .upsert(&key, (a, c), Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(service.get(&key).await.unwrap().is_none());
    }
}
