use crate::error::AppError;
use crate::services::HistoryEntry;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryEntry>,
    pub limit: usize,
}

/// Conversation history as `user_id` is allowed to see it, oldest first
/// GET /api/v1/users/{user_id}/conversations/{other_id}/messages?limit=
#[get("/api/v1/users/{user_id}/conversations/{other_id}/messages")]
pub async fn get_history(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let (user_id, other_id) = path.into_inner();
    let limit = state.history.effective_limit(query.limit);
    let messages = state
        .history
        .load_history(user_id, other_id, Some(limit))
        .await?;

    Ok(HttpResponse::Ok().json(HistoryResponse { messages, limit }))
}
