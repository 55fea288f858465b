use super::{ConversationStore, MessageStore, PresenceStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationKey, ConversationUpsert, DeleteScope, Message, MessageStatus,
    NewMessage, UserPresence,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, sequence_number, conversation_key, sender_id, receiver_id, \
     body, status, created_at, reply_to, is_edited, edited_at, deleted_for, delete_scope";

const CONVERSATION_COLUMNS: &str =
    "conversation_key, participant_a, participant_b, last_message_id, last_message_at, created_at";

/// Durable store over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgStore {
    db: Pool,
}

impl PgStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    async fn client(&self) -> AppResult<deadpool_postgres::Client> {
        let client = db_pool::acquire_with_metrics(&self.db, "direct-chat-service").await?;
        Ok(client)
    }
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    let key: String = row.try_get("conversation_key")?;
    let status: String = row.try_get("status")?;
    let delete_scope: String = row.try_get("delete_scope")?;
    let deleted_for: Vec<Uuid> = row.try_get("deleted_for")?;

    Ok(Message {
        id: row.try_get("id")?,
        sequence_number: row.try_get("sequence_number")?,
        conversation_key: ConversationKey::parse(&key)
            .map_err(|e| AppError::Persistence(e.to_string()))?,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        body: row.try_get("body")?,
        status: status.parse::<MessageStatus>()?,
        created_at: row.try_get("created_at")?,
        reply_to: row.try_get("reply_to")?,
        is_edited: row.try_get("is_edited")?,
        edited_at: row.try_get("edited_at")?,
        deleted_for: deleted_for.into_iter().collect(),
        delete_scope: delete_scope.parse::<DeleteScope>()?,
    })
}

fn conversation_from_row(row: &Row) -> AppResult<Conversation> {
    let key: String = row.try_get("conversation_key")?;
    Ok(Conversation {
        key: ConversationKey::parse(&key).map_err(|e| AppError::Persistence(e.to_string()))?,
        participants: (row.try_get("participant_a")?, row.try_get("participant_b")?),
        last_message_id: row.try_get("last_message_id")?,
        last_message_at: row.try_get("last_message_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn presence_from_row(row: &Row) -> AppResult<UserPresence> {
    Ok(UserPresence {
        user_id: row.try_get("user_id")?,
        is_online: row.try_get("is_online")?,
        last_seen: row.try_get("last_seen")?,
    })
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, new_message: NewMessage) -> AppResult<Message> {
        let client = self.client().await?;
        let id = Uuid::new_v4();
        let sql = format!(
            "INSERT INTO messages (id, conversation_key, sender_id, receiver_id, body, status, \
                 created_at, reply_to) \
             VALUES ($1, $2, $3, $4, $5, 'sent', $6, $7) \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &id,
                    &new_message.conversation_key.as_str(),
                    &new_message.sender_id,
                    &new_message.receiver_id,
                    &new_message.body,
                    &new_message.created_at,
                    &new_message.reply_to,
                ],
            )
            .await?;
        message_from_row(&row)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let client = self.client().await?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        client
            .query_opt(&sql, &[&id])
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }

    async fn save_message(&self, message: &Message) -> AppResult<()> {
        let client = self.client().await?;
        let deleted_for: Vec<Uuid> = message.deleted_for.iter().copied().collect();
        let updated = client
            .execute(
                "UPDATE messages SET body = $2, status = $3, is_edited = $4, edited_at = $5, \
                     deleted_for = $6, delete_scope = $7 \
                 WHERE id = $1",
                &[
                    &message.id,
                    &message.body,
                    &message.status.as_str(),
                    &message.is_edited,
                    &message.edited_at,
                    &deleted_for,
                    &message.delete_scope.as_str(),
                ],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn remove_message(&self, id: Uuid) -> AppResult<()> {
        let client = self.client().await?;
        let removed = client
            .execute("DELETE FROM messages WHERE id = $1", &[&id])
            .await?;
        if removed == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn list_visible(
        &self,
        key: &ConversationKey,
        viewer_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_key = $1 \
               AND delete_scope <> 'for_both' \
               AND NOT ($2 = ANY(deleted_for)) \
             ORDER BY created_at DESC, sequence_number DESC \
             LIMIT $3"
        );
        let rows = client
            .query(&sql, &[&key.as_str(), &viewer_id, &(limit as i64)])
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn pending_for(&self, receiver_id: Uuid) -> AppResult<Vec<Message>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE receiver_id = $1 AND status = 'sent' \
             ORDER BY sequence_number ASC"
        );
        let rows = client.query(&sql, &[&receiver_id]).await?;
        rows.iter().map(message_from_row).collect()
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn upsert_conversation(&self, upsert: ConversationUpsert) -> AppResult<Conversation> {
        let client = self.client().await?;
        let (participant_a, participant_b) = upsert.key.participants();
        // GREATEST ignores NULL, so the first upsert on an empty row still lands.
        let sql = format!(
            "INSERT INTO conversations \
                 (conversation_key, participant_a, participant_b, last_message_id, \
                  last_message_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             ON CONFLICT (conversation_key) DO UPDATE SET \
                 last_message_id = CASE \
                     WHEN conversations.last_message_at IS NULL \
                       OR EXCLUDED.last_message_at >= conversations.last_message_at \
                     THEN EXCLUDED.last_message_id \
                     ELSE conversations.last_message_id END, \
                 last_message_at = GREATEST(conversations.last_message_at, EXCLUDED.last_message_at) \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &upsert.key.as_str(),
                    &participant_a,
                    &participant_b,
                    &upsert.last_message_id,
                    &upsert.last_message_at,
                ],
            )
            .await?;
        conversation_from_row(&row)
    }

    async fn get_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_key = $1"
        );
        client
            .query_opt(&sql, &[&key.as_str()])
            .await?
            .as_ref()
            .map(conversation_from_row)
            .transpose()
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Conversation>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE participant_a = $1 OR participant_b = $1 \
             ORDER BY last_message_at DESC NULLS LAST, conversation_key ASC \
             LIMIT $2"
        );
        let rows = client.query(&sql, &[&user_id, &(limit as i64)]).await?;
        rows.iter().map(conversation_from_row).collect()
    }
}

#[async_trait]
impl PresenceStore for PgStore {
    async fn set_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO user_presence (user_id, is_online, last_seen, updated_at) \
                 VALUES ($1, $2, $3, NOW()) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                     is_online = EXCLUDED.is_online, \
                     last_seen = COALESCE(EXCLUDED.last_seen, user_presence.last_seen), \
                     updated_at = NOW()",
                &[&user_id, &is_online, &last_seen],
            )
            .await?;
        Ok(())
    }

    async fn get_presence(&self, user_id: Uuid) -> AppResult<Option<UserPresence>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT user_id, is_online, last_seen FROM user_presence WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        row.as_ref().map(presence_from_row).transpose()
    }
}
