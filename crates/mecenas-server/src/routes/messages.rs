use std::convert::Infallible;

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use mecenas_core::ids::ConversationId;
use mecenas_core::messages::Role;
use mecenas_engine::transcript::Attachment;
use mecenas_engine::{NewUserInput, TranscriptBuilder, TurnLoop};
use mecenas_store::messages::MessageRow;

use crate::error::ServerError;
use crate::routes::require_user;
use crate::server::AppState;

/// Declared types accepted as uploads, mirroring the rest of the product.
const ALLOWED_ATTACHMENT_TYPES: [&str; 4] = [
    "application/pdf",
    "image/jpeg",
    "image/png",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Buffered frames between the loop and the transport; one frame per event,
/// flushed as received, no batching.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/chat/conversations/{id}/messages",
        get(list_messages).post(post_message),
    )
}

#[derive(Deserialize)]
pub struct PostMessageBody {
    pub content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

impl From<MessageRow> for MessageResponse {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id.as_str().to_owned(),
            conversation_id: row.conversation_id.as_str().to_owned(),
            role: row.role.to_string(),
            content: row.content,
            created_at: row.created_at,
        }
    }
}

async fn list_messages(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ServerError> {
    let user_id = require_user(&headers)?;
    let conversation_id = ConversationId::from_raw(id);
    state.conversations.get(&conversation_id, &user_id)?;
    let rows = state.messages.list(&conversation_id)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Append a user turn and stream the assistant's response.
///
/// All validation happens before the stream begins, with plain status-code
/// errors. Once the SSE response starts, failures are in-band frames only.
/// The orchestration runs in a spawned task that also persists the assistant
/// row when the loop ends, so a client disconnect cancels streaming but
/// never the write.
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    let user_id = require_user(req.headers())?;
    let conversation_id = ConversationId::from_raw(id);

    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let input = if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|_| ServerError::BadRequest("Nieprawidlowe dane formularza".into()))?;
        read_multipart_input(multipart, state.transcript.max_attachment_bytes()).await?
    } else {
        let Json(body) = Json::<PostMessageBody>::from_request(req, &state)
            .await
            .map_err(|_| ServerError::BadRequest("Nieprawidlowe dane".into()))?;
        NewUserInput::text_only(body.content)
    };

    if input.text.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "Tresc wiadomosci jest wymagana".into(),
        ));
    }

    state.conversations.get(&conversation_id, &user_id)?;
    let history = state.messages.list(&conversation_id)?;

    // Builds and size-checks the provider context; rejects oversized
    // attachments before any model call.
    let context = state
        .transcript
        .build(&history, &input, state.registry.definitions())?;

    // The user row goes in synchronously before orchestration starts, so a
    // crash mid-turn still leaves the input recorded.
    let persisted = TranscriptBuilder::persisted_user_text(&input);
    state
        .messages
        .append(&conversation_id, Role::User, &persisted)?;

    debug!(conversation_id = %conversation_id, history_len = history.len(), "starting turn");

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let turn = TurnLoop::new(
        state.provider.clone(),
        state.registry.clone(),
        state.turn_config.clone(),
        tx,
    );

    let repo = state.messages.clone();
    tokio::spawn(async move {
        let outcome = turn.run(&conversation_id, context).await;
        if outcome.text.is_empty() {
            return;
        }
        if let Err(e) = repo.append(&conversation_id, Role::Assistant, &outcome.text) {
            error!(conversation_id = %conversation_id, error = %e, "failed to persist assistant message");
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|event| Ok::<Event, Infallible>(Event::default().data(event.to_frame().to_string())));

    Ok(Sse::new(stream).into_response())
}

/// Read a `{content, file}` multipart form, enforcing the size limit while
/// the body is still streaming in and the declared type against the allowed
/// list.
async fn read_multipart_input(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<NewUserInput, ServerError> {
    let mut text = String::new();
    let mut attachment = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ServerError::BadRequest("Nieprawidlowe dane formularza".into()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("content") => {
                text = field
                    .text()
                    .await
                    .map_err(|_| ServerError::BadRequest("Nieprawidlowe dane formularza".into()))?;
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("zalacznik").to_owned();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();

                if !ALLOWED_ATTACHMENT_TYPES.contains(&mime_type.as_str()) {
                    return Err(ServerError::BadRequest(format!(
                        "Niedozwolony typ pliku: {mime_type}"
                    )));
                }

                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(|_| {
                    ServerError::BadRequest("Nieprawidlowe dane formularza".into())
                })? {
                    if data.len() + chunk.len() > max_bytes {
                        return Err(ServerError::PayloadTooLarge(
                            crate::error::attachment_limit_message(max_bytes),
                        ));
                    }
                    data.extend_from_slice(&chunk);
                }

                attachment = Some(Attachment {
                    file_name,
                    mime_type,
                    data,
                });
            }
            _ => {}
        }
    }

    Ok(NewUserInput { text, attachment })
}
