use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presence-relevant projection of a user, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
