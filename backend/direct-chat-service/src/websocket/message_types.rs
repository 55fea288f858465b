use crate::error::{AppError, AppResult};
use crate::models::{ConversationKey, DeleteRequest, DeleteScope, MessageDto, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on ids in a single `seen` / `delivered` batch.
pub const MAX_BATCH_IDS: usize = 500;

/// Inbound WebSocket events from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    #[serde(rename = "send")]
    Send {
        receiver_id: Uuid,
        body: String,
        #[serde(default)]
        reply_to: Option<Uuid>,
        /// Opaque client correlation id, echoed back in `message.sent`
        #[serde(default)]
        client_message_id: Option<String>,
    },
    #[serde(rename = "seen")]
    Seen { message_ids: Vec<Uuid> },
    #[serde(rename = "delivered")]
    Delivered { message_ids: Vec<Uuid> },
    #[serde(rename = "typing")]
    Typing {
        receiver_id: Uuid,
        #[serde(default = "default_is_typing")]
        is_typing: bool,
    },
    #[serde(rename = "edit")]
    Edit { message_id: Uuid, body: String },
    #[serde(rename = "delete")]
    Delete {
        message_id: Uuid,
        scope: DeleteRequest,
    },
}

fn default_is_typing() -> bool {
    true
}

impl WsInboundEvent {
    /// Parse one text frame. Anything that is not a known, well-formed event
    /// is a `BadRequest`.
    pub fn parse(text: &str) -> AppResult<Self> {
        let event: Self = serde_json::from_str(text)
            .map_err(|e| AppError::BadRequest(format!("malformed frame: {e}")))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> AppResult<()> {
        match self {
            WsInboundEvent::Seen { message_ids } | WsInboundEvent::Delivered { message_ids } => {
                if message_ids.is_empty() {
                    return Err(AppError::BadRequest("message_ids must not be empty".into()));
                }
                if message_ids.len() > MAX_BATCH_IDS {
                    return Err(AppError::BadRequest(format!(
                        "at most {MAX_BATCH_IDS} message_ids per frame"
                    )));
                }
                Ok(())
            }
            WsInboundEvent::Send {
                client_message_id: Some(id),
                ..
            } if id.len() > 128 => Err(AppError::BadRequest(
                "client_message_id longer than 128 bytes".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            WsInboundEvent::Send { .. } => "send",
            WsInboundEvent::Seen { .. } => "seen",
            WsInboundEvent::Delivered { .. } => "delivered",
            WsInboundEvent::Typing { .. } => "typing",
            WsInboundEvent::Edit { .. } => "edit",
            WsInboundEvent::Delete { .. } => "delete",
        }
    }
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    #[serde(rename = "message.new")]
    MessageNew { message: MessageDto },
    #[serde(rename = "message.sent")]
    MessageSent {
        message: MessageDto,
        client_message_id: Option<String>,
    },
    #[serde(rename = "message.status")]
    StatusChanged {
        message_id: Uuid,
        conversation_key: ConversationKey,
        status: MessageStatus,
    },
    #[serde(rename = "message.edited")]
    MessageEdited {
        message_id: Uuid,
        conversation_key: ConversationKey,
        new_body: String,
        is_edited: bool,
        edited_at: Option<DateTime<Utc>>,
    },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        message_id: Uuid,
        conversation_key: ConversationKey,
        scope: DeleteScope,
    },
    #[serde(rename = "typing")]
    Typing { user_id: Uuid, is_typing: bool },
    #[serde(rename = "presence.online")]
    PresenceOnline { user_id: Uuid },
    #[serde(rename = "presence.offline")]
    PresenceOffline {
        user_id: Uuid,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename = "presence.snapshot")]
    PresenceSnapshot { online_user_ids: Vec<Uuid> },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl WsOutboundEvent {
    pub fn from_error(err: &AppError) -> Self {
        WsOutboundEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            WsOutboundEvent::MessageNew { .. } => "message.new",
            WsOutboundEvent::MessageSent { .. } => "message.sent",
            WsOutboundEvent::StatusChanged { .. } => "message.status",
            WsOutboundEvent::MessageEdited { .. } => "message.edited",
            WsOutboundEvent::MessageDeleted { .. } => "message.deleted",
            WsOutboundEvent::Typing { .. } => "typing",
            WsOutboundEvent::PresenceOnline { .. } => "presence.online",
            WsOutboundEvent::PresenceOffline { .. } => "presence.offline",
            WsOutboundEvent::PresenceSnapshot { .. } => "presence.snapshot",
            WsOutboundEvent::Error { .. } => "error",
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_frame(&self) -> AppResult<String> {
        encode_frame(self.event_name(), self)
    }
}

pub(crate) fn encode_frame<T: Serialize + ?Sized>(event: &str, value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(|e| {
        tracing::error!(event = event, error = %e, "failed to encode frame");
        AppError::Internal
    })
}
