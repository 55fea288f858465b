use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between the two ids. Never appears in a hyphenated UUID.
const KEY_SEPARATOR: char = '_';

/// Deterministic identifier for an unordered pair of users.
///
/// Both ids are rendered in lowercase hyphenated form and sorted by byte
/// order, so `for_pair(a, b) == for_pair(b, a)` and the key is stable across
/// restarts and locales.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn for_pair(a: Uuid, b: Uuid) -> Self {
        let (first, second) = canonical_order(a, b);
        Self(format!(
            "{}{}{}",
            first.hyphenated(),
            KEY_SEPARATOR,
            second.hyphenated()
        ))
    }

    /// Validate a key that came from outside the process.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let (a, b) = raw
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| AppError::BadRequest(format!("malformed conversation key: {raw}")))?;
        let a = Uuid::parse_str(a)
            .map_err(|_| AppError::BadRequest(format!("malformed conversation key: {raw}")))?;
        let b = Uuid::parse_str(b)
            .map_err(|_| AppError::BadRequest(format!("malformed conversation key: {raw}")))?;

        let key = Self::for_pair(a, b);
        if key.0 != raw {
            return Err(AppError::BadRequest(format!(
                "conversation key is not canonical: {raw}"
            )));
        }
        Ok(key)
    }

    /// The two participants in canonical order.
    pub fn participants(&self) -> (Uuid, Uuid) {
        // Constructed only through for_pair/parse, so both halves are valid UUIDs.
        let (a, b) = self.0.split_once(KEY_SEPARATOR).unwrap_or_default();
        (
            Uuid::parse_str(a).unwrap_or_default(),
            Uuid::parse_str(b).unwrap_or_default(),
        )
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        let (a, b) = self.participants();
        a == user_id || b == user_id
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_order(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    let (sa, sb) = (a.hyphenated().to_string(), b.hyphenated().to_string());
    if sa <= sb {
        (a, b)
    } else {
        (b, a)
    }
}

/// Summary record per conversation, used for listing and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub participants: (Uuid, Uuid),
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            (a, b) if a == user_id => Some(b),
            (a, b) if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Create-or-update request for the conversation index.
#[derive(Debug, Clone)]
pub struct ConversationUpsert {
    pub key: ConversationKey,
    pub last_message_id: Uuid,
    pub last_message_at: DateTime<Utc>,
}

impl ConversationUpsert {
    /// Apply this upsert to an existing record. A stale upsert (older than the
    /// stored pointer) leaves the record untouched.
    pub fn apply_to(&self, existing: &mut Conversation) {
        let newer = match existing.last_message_at {
            Some(current) => self.last_message_at >= current,
            None => true,
        };
        if newer {
            existing.last_message_id = Some(self.last_message_id);
            existing.last_message_at = Some(self.last_message_at);
        }
    }

    pub fn into_new(self) -> Conversation {
        let participants = self.key.participants();
        Conversation {
            participants,
            last_message_id: Some(self.last_message_id),
            last_message_at: Some(self.last_message_at),
            created_at: self.last_message_at,
            key: self.key,
        }
    }
}
