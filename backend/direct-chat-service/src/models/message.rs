use crate::error::AppError;
use crate::models::conversation::ConversationKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery state. Variant order is the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "seen" => Ok(MessageStatus::Seen),
            other => Err(AppError::Persistence(format!("unknown message status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    None,
    ForSenderOnly,
    ForBoth,
}

impl DeleteScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteScope::None => "none",
            DeleteScope::ForSenderOnly => "for_sender_only",
            DeleteScope::ForBoth => "for_both",
        }
    }
}

impl FromStr for DeleteScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DeleteScope::None),
            "for_sender_only" => Ok(DeleteScope::ForSenderOnly),
            "for_both" => Ok(DeleteScope::ForBoth),
            other => Err(AppError::Persistence(format!("unknown delete scope: {other}"))),
        }
    }
}

/// Scope a client may request. `None` is a stored state, not a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteRequest {
    ForSenderOnly,
    ForBoth,
}

/// Message record as owned by the lifecycle store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sequence_number: i64,
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub reply_to: Option<Uuid>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_for: BTreeSet<Uuid>,
    pub delete_scope: DeleteScope,
}

/// Insert request; the store assigns `id` and `sequence_number`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn into_message(self, id: Uuid, sequence_number: i64) -> Message {
        Message {
            id,
            sequence_number,
            conversation_key: self.conversation_key,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            status: MessageStatus::Sent,
            created_at: self.created_at,
            reply_to: self.reply_to,
            is_edited: false,
            edited_at: None,
            deleted_for: BTreeSet::new(),
            delete_scope: DeleteScope::None,
        }
    }
}

impl Message {
    /// Move forward to `target`; returns whether the status changed.
    /// Requests that would move backwards are ignored.
    pub fn advance_status(&mut self, target: MessageStatus) -> bool {
        if target > self.status {
            self.status = target;
            true
        } else {
            false
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    pub fn is_visible_to(&self, viewer_id: Uuid) -> bool {
        self.delete_scope != DeleteScope::ForBoth && !self.deleted_for.contains(&viewer_id)
    }

    pub fn apply_edit(&mut self, new_body: String, at: DateTime<Utc>) {
        self.body = new_body;
        self.is_edited = true;
        self.edited_at = Some(at);
    }

    /// Apply a delete request; returns whether anything changed.
    pub fn apply_delete(&mut self, requester_id: Uuid, request: DeleteRequest) -> bool {
        match request {
            DeleteRequest::ForSenderOnly => {
                let inserted = self.deleted_for.insert(requester_id);
                let rescoped = self.delete_scope == DeleteScope::None;
                if rescoped {
                    self.delete_scope = DeleteScope::ForSenderOnly;
                }
                inserted || rescoped
            }
            DeleteRequest::ForBoth => {
                let target: BTreeSet<Uuid> = [self.sender_id, self.receiver_id].into_iter().collect();
                let changed = self.delete_scope != DeleteScope::ForBoth || self.deleted_for != target;
                self.delete_scope = DeleteScope::ForBoth;
                self.deleted_for = target;
                changed
            }
        }
    }
}

/// Embedded summary of the message a history entry replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySummary {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
}

impl ReplySummary {
    /// Summary of `referenced` as `viewer_id` may see it, if at all.
    pub fn visible_to(referenced: &Message, viewer_id: Uuid) -> Option<Self> {
        referenced.is_visible_to(viewer_id).then(|| Self::from(referenced))
    }
}

impl From<&Message> for ReplySummary {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            body: m.body.clone(),
        }
    }
}

/// Client-facing projection of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub status: MessageStatus,
    pub created_at: String,
    pub sequence_number: i64,
    pub is_edited: bool,
    pub reply_to: Option<Uuid>,
    pub reply: Option<ReplySummary>,
}

impl MessageDto {
    pub fn from_message(m: &Message, reply: Option<ReplySummary>) -> Self {
        Self {
            id: m.id,
            conversation_key: m.conversation_key.clone(),
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            body: m.body.clone(),
            status: m.status,
            created_at: m.created_at.to_rfc3339(),
            sequence_number: m.sequence_number,
            is_edited: m.is_edited,
            reply_to: m.reply_to,
            reply,
        }
    }
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self::from_message(m, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        NewMessage {
            conversation_key: ConversationKey::for_pair(sender, receiver),
            sender_id: sender,
            receiver_id: receiver,
            body: "hi".into(),
            reply_to: None,
            created_at: Utc::now(),
        }
        .into_message(Uuid::new_v4(), 1)
    }

    #[test]
    fn test_new_message_defaults() {
        let m = sample();
        assert_eq!(m.status, MessageStatus::Sent);
        assert_eq!(m.delete_scope, DeleteScope::None);
        assert!(m.deleted_for.is_empty());
        assert!(!m.is_edited);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut m = sample();
        assert!(m.advance_status(MessageStatus::Seen));
        assert!(!m.advance_status(MessageStatus::Delivered));
        assert!(!m.advance_status(MessageStatus::Sent));
        assert!(!m.advance_status(MessageStatus::Seen));
        assert_eq!(m.status, MessageStatus::Seen);
    }

    #[test]
    fn test_delete_for_sender_only_is_idempotent() {
        let mut m = sample();
        let sender = m.sender_id;
        assert!(m.apply_delete(sender, DeleteRequest::ForSenderOnly));
        assert!(!m.apply_delete(sender, DeleteRequest::ForSenderOnly));
        assert_eq!(m.delete_scope, DeleteScope::ForSenderOnly);
        assert_eq!(m.deleted_for.len(), 1);
        assert!(!m.is_visible_to(sender));
        assert!(m.is_visible_to(m.receiver_id));
    }

    #[test]
    fn test_for_both_is_not_downgraded() {
        let mut m = sample();
        let (sender, receiver) = (m.sender_id, m.receiver_id);
        m.apply_delete(sender, DeleteRequest::ForBoth);
        m.apply_delete(receiver, DeleteRequest::ForSenderOnly);
        assert_eq!(m.delete_scope, DeleteScope::ForBoth);
        assert!(m.deleted_for.contains(&sender) && m.deleted_for.contains(&receiver));
        assert!(!m.is_visible_to(sender));
        assert!(!m.is_visible_to(receiver));
    }

    #[test]
    fn test_status_ordering_strings() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Seen);
        for s in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Seen] {
            assert_eq!(s.as_str().parse::<MessageStatus>().unwrap(), s);
        }
        for d in [DeleteScope::None, DeleteScope::ForSenderOnly, DeleteScope::ForBoth] {
            assert_eq!(d.as_str().parse::<DeleteScope>().unwrap(), d);
        }
    }

    #[test]
    fn test_dto_serialization() {
        let m = sample();
        let value = serde_json::to_value(MessageDto::from(&m)).unwrap();
        assert_eq!(value["status"], "sent");
        assert_eq!(value["body"], "hi");
        assert!(value["reply"].is_null());
        assert!(value["reply_to"].is_null());
    }
}
