// =============================================================================
// Webhook Authentication — bearer-token extractor
// =============================================================================
//
// Alerts carry `Authorization: Bearer <token>`; the expected token is loaded
// once at startup and lives in [`AppState`], so a request never touches the
// process environment. Comparison is constant time.
//
// Usage as an Axum extractor:
//
//   async fn handler(_auth: AuthBearer, ...) { ... }
//
// A missing or wrong token short-circuits the request with 403 Forbidden
// before the handler body executes.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

/// Compare two byte slices in constant time, examining every byte of both
/// slices even when a mismatch is found early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        // A length mismatch already reveals that lengths differ; the expected
        // token's length is not attacker-controlled, so that is acceptable.
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Marker extractor proving the request presented the configured webhook
/// token.
pub struct AuthBearer;

pub struct AuthRejection {
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthBearer {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.webhook_token();

        if expected.is_empty() {
            warn!("no webhook token configured — rejecting all authenticated requests");
            return Err(AuthRejection {
                message: "Server authentication not configured",
            });
        }

        let presented = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
                Ok(AuthBearer)
            }
            Some(_) => {
                warn!("invalid webhook token presented");
                Err(AuthRejection {
                    message: "Invalid authorization token",
                })
            }
            None => {
                warn!("missing or malformed Authorization header");
                Err(AuthRejection {
                    message: "Missing or invalid authorization token",
                })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notify::NullNotifier;
    use crate::processor::SignalProcessor;
    use crate::testutil::MockExchange;
    use axum::http::Request;

    fn state_with_token(token: &str) -> Arc<AppState> {
        let mock = Arc::new(MockExchange::flat());
        let processor = SignalProcessor::new(mock, Arc::new(NullNotifier), Config::default());
        Arc::new(AppState::new(processor, token.to_string()))
    }

    fn parts_with_header(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/webhook");
        if let Some(v) = value {
            builder = builder.header("authorization", v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn correct_token_is_accepted() {
        let state = state_with_token("hunter2");
        let mut parts = parts_with_header(Some("Bearer hunter2"));
        assert!(AuthBearer::from_request_parts(&mut parts, &state).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let state = state_with_token("hunter2");
        let mut parts = parts_with_header(Some("Bearer hunter3"));
        assert!(AuthBearer::from_request_parts(&mut parts, &state).await.is_err());
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let state = state_with_token("hunter2");
        let mut parts = parts_with_header(None);
        assert!(AuthBearer::from_request_parts(&mut parts, &state).await.is_err());
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let state = state_with_token("hunter2");
        let mut parts = parts_with_header(Some("Basic aHVudGVyMg=="));
        assert!(AuthBearer::from_request_parts(&mut parts, &state).await.is_err());
    }

    #[tokio::test]
    async fn empty_configured_token_rejects_everything() {
        let state = state_with_token("");
        let mut parts = parts_with_header(Some("Bearer "));
        assert!(AuthBearer::from_request_parts(&mut parts, &state).await.is_err());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer_string"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }
}
