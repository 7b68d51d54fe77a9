pub mod conversations;
pub mod messages;

use axum::http::HeaderMap;

use crate::error::ServerError;

/// The session middleware is an external collaborator; the `x-user-id`
/// header stands in for the identity it would establish.
pub(crate) fn require_user(headers: &HeaderMap) -> Result<String, ServerError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .filter(|s| !s.is_empty())
        .ok_or(ServerError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            require_user(&headers),
            Err(ServerError::Unauthorized)
        ));
    }

    #[test]
    fn empty_header_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static(""));
        assert!(require_user(&headers).is_err());
    }

    #[test]
    fn present_header_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("user-1"));
        assert_eq!(require_user(&headers).unwrap(), "user-1");
    }
}
