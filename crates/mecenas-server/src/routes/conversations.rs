use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use mecenas_core::ids::ConversationId;
use mecenas_store::conversations::ConversationRow;

use crate::error::ServerError;
use crate::routes::require_user;
use crate::server::AppState;

const DEFAULT_TITLE: &str = "Nowa rozmowa";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/chat/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/chat/conversations/{id}", delete(delete_conversation))
}

#[derive(Deserialize, Default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: String,
}

impl From<ConversationRow> for ConversationResponse {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id.as_str().to_owned(),
            owner_id: row.owner_id,
            title: row.title,
            created_at: row.created_at,
        }
    }
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationResponse>>, ServerError> {
    let user_id = require_user(&headers)?;
    let rows = state.conversations.list_by_owner(&user_id)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateConversationRequest>>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let user_id = require_user(&headers)?;
    let title = body
        .and_then(|Json(b)| b.title)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_owned());

    let row = state.conversations.create(&user_id, &title)?;
    info!(conversation_id = %row.id, "conversation created");
    Ok(Json(row.into()))
}

async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user_id = require_user(&headers)?;
    let conversation_id = ConversationId::from_raw(id);
    state.conversations.delete(&conversation_id, &user_id)?;
    info!(conversation_id = %conversation_id, "conversation deleted");
    Ok(Json(serde_json::json!({ "ok": true })))
}
