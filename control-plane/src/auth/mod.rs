//! Static API key check for the gateway.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use fleet_common::ErrorBody;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid API key")]
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ErrorBody::new("authentication_error", self.to_string());
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// The configured gateway key, if any.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuth {
    key: Option<Arc<str>>,
}

impl ApiKeyAuth {
    /// An empty key counts as no key.
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Accepts `Bearer <key>`, `sk-<key>` or the bare key.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(key) = self.key.as_deref() else {
            return Ok(());
        };

        let value = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidKey)?
            .trim();

        let presented = [
            Some(value),
            value.strip_prefix("Bearer "),
            value.strip_prefix("sk-"),
        ];
        if presented.into_iter().flatten().any(|candidate| candidate == key) {
            Ok(())
        } else {
            Err(AuthError::InvalidKey)
        }
    }
}

/// Rejects requests without the configured key.
pub async fn require_api_key(
    State(auth): State<ApiKeyAuth>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if let Err(e) = auth.authenticate(request.headers()) {
        tracing::debug!(path = %request.uri().path(), "Rejected request: {}", e);
        return Err(e);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let auth = ApiKeyAuth::new(None);
        assert!(!auth.is_enabled());
        assert!(auth.authenticate(&HeaderMap::new()).is_ok());
        assert!(!ApiKeyAuth::new(Some(String::new())).is_enabled());
    }

    #[test]
    fn test_accepted_forms() {
        let auth = ApiKeyAuth::new(Some("secret".to_string()));
        for value in ["Bearer secret", "sk-secret", "secret"] {
            assert_eq!(auth.authenticate(&headers_with_auth(value)), Ok(()), "{}", value);
        }
    }

    #[test]
    fn test_rejections() {
        let auth = ApiKeyAuth::new(Some("secret".to_string()));
        assert_eq!(auth.authenticate(&HeaderMap::new()), Err(AuthError::MissingHeader));
        for value in ["Bearer wrong", "sk-wrong", "Basic secret", "Bearer sk-other"] {
            assert_eq!(
                auth.authenticate(&headers_with_auth(value)),
                Err(AuthError::InvalidKey),
                "{}",
                value
            );
        }
    }
}
