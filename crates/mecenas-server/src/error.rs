//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body HTTP
//! response with the right status code. Internal errors are logged with full
//! detail but only a generic message reaches the caller. Client-facing
//! messages are Polish, matching the rest of the product surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use mecenas_engine::EngineError;
use mecenas_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// No user identity on the request.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a resource that does not exist (or is not theirs).
    #[error("not found: {0}")]
    NotFound(String),

    /// Uploaded attachment exceeds the configured limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Propagated from the store.
    #[error("database error: {0}")]
    Database(StoreError),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Nie zalogowany".to_owned()),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
            Self::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Wewnetrzny blad serwera".to_owned(),
                )
            }
            Self::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Wewnetrzny blad serwera".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => Self::NotFound("Rozmowa nie istnieje".to_owned()),
            other => Self::Database(other),
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::AttachmentTooLarge { limit, .. } => {
                Self::PayloadTooLarge(attachment_limit_message(limit))
            }
        }
    }
}

/// Client-facing 413 message carrying the configured limit, not a constant.
pub(crate) fn attachment_limit_message(limit: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;
    let human = if limit >= MB && limit % MB == 0 {
        format!("{} MB", limit / MB)
    } else if limit >= KB && limit % KB == 0 {
        format!("{} KB", limit / KB)
    } else {
        format!("{limit} B")
    };
    format!("Plik jest za duzy (maksymalnie {human})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ServerError = StoreError::NotFound("conversation x".into()).into();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn oversized_attachment_maps_to_413_with_configured_limit() {
        let err: ServerError =
            EngineError::AttachmentTooLarge { size: 2048, limit: 1024 }.into();
        let ServerError::PayloadTooLarge(msg) = err else {
            panic!("expected PayloadTooLarge");
        };
        assert!(msg.contains("1 KB"), "got: {msg}");
    }

    #[test]
    fn limit_message_formats_human_units() {
        assert!(attachment_limit_message(10 * 1024 * 1024).contains("10 MB"));
        assert!(attachment_limit_message(512 * 1024).contains("512 KB"));
        assert!(attachment_limit_message(100).contains("100 B"));
    }

    #[test]
    fn unauthorized_response_body() {
        let resp = ServerError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
