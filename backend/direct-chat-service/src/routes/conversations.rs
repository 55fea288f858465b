use crate::error::AppError;
use crate::models::Conversation;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_key: String,
    pub other_user_id: Option<Uuid>,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

impl ConversationResponse {
    fn for_user(conversation: Conversation, user_id: Uuid) -> Self {
        Self {
            other_user_id: conversation.other_participant(user_id),
            conversation_key: conversation.key.to_string(),
            last_message_id: conversation.last_message_id,
            last_message_at: conversation.last_message_at.map(|t| t.to_rfc3339()),
            created_at: conversation.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

/// Conversations of a user, most recently active first
/// GET /api/v1/users/{user_id}/conversations?limit=
#[get("/api/v1/users/{user_id}/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let limit = state.history.effective_limit(query.limit);
    let conversations = state
        .conversations
        .list_for_user(user_id, limit)
        .await?
        .into_iter()
        .map(|c| ConversationResponse::for_user(c, user_id))
        .collect::<Vec<_>>();

    Ok(HttpResponse::Ok().json(conversations))
}

/// Persisted presence, falling back to the live registry for users the store
/// has never seen
/// GET /api/v1/users/{user_id}/presence
#[get("/api/v1/users/{user_id}/presence")]
pub async fn get_presence(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let response = match state.stores.presence.get_presence(user_id).await? {
        Some(p) => PresenceResponse {
            user_id: p.user_id,
            is_online: p.is_online,
            last_seen: p.last_seen.map(|t| t.to_rfc3339()),
        },
        None => PresenceResponse {
            user_id,
            is_online: state.registry.is_online(user_id),
            last_seen: None,
        },
    };

    Ok(HttpResponse::Ok().json(response))
}
