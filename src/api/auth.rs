// =============================================================================
// Admin Authentication — bearer-token gate over the operational surface
// =============================================================================
//
// Every endpoint except /health requires `Authorization: Bearer <token>`
// matching the token in ApiState. Submitting nodes authenticate their
// payloads separately through signal signatures; this gate covers the
// operator surface (registration, feedback flows, metrics, state).
// =============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::api::ApiState;

/// Marker extractor: a handler listing it only runs after the request has
/// passed the admin-token check.
pub struct AuthBearer;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No admin token was configured at startup; the authenticated surface
    /// is closed entirely.
    NotConfigured,
    MissingHeader,
    BadToken,
}

impl AuthError {
    fn message(self) -> &'static str {
        match self {
            Self::NotConfigured => "server authentication not configured",
            Self::MissingHeader => "missing or malformed authorization header",
            Self::BadToken => "invalid authorization token",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        warn!(reason = self.message(), "request rejected by admin auth");
        let body = serde_json::json!({ "error": self.message() });
        (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
    }
}

#[async_trait]
impl FromRequestParts<ApiState> for AuthBearer {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        if state.admin_token.is_empty() {
            return Err(AuthError::NotConfigured);
        }

        let presented = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingHeader)?;

        if !state.token_matches(presented) {
            return Err(AuthError::BadToken);
        }

        Ok(AuthBearer)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConsensusEngine;
    use crate::engine_config::EngineConfig;
    use crate::verify::NoopVerifier;
    use axum::http::Request;
    use std::sync::Arc;

    fn state(token: &str) -> ApiState {
        let engine = Arc::new(ConsensusEngine::new(
            EngineConfig::default(),
            Arc::new(NoopVerifier),
        ));
        ApiState::new(engine, token)
    }

    fn parts(auth_header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/nodes");
        if let Some(value) = auth_header {
            builder = builder.header("authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn accepts_matching_token() {
        let mut parts = parts(Some("Bearer sesame"));
        assert!(AuthBearer::from_request_parts(&mut parts, &state("sesame"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_token() {
        let mut parts = parts(Some("Bearer guess"));
        assert_eq!(
            AuthBearer::from_request_parts(&mut parts, &state("sesame"))
                .await
                .err(),
            Some(AuthError::BadToken)
        );
    }

    #[tokio::test]
    async fn rejects_missing_and_malformed_headers() {
        let state = state("sesame");

        let mut no_header = parts(None);
        assert_eq!(
            AuthBearer::from_request_parts(&mut no_header, &state)
                .await
                .err(),
            Some(AuthError::MissingHeader)
        );

        let mut not_bearer = parts(Some("Basic c2VzYW1l"));
        assert_eq!(
            AuthBearer::from_request_parts(&mut not_bearer, &state)
                .await
                .err(),
            Some(AuthError::MissingHeader)
        );
    }

    #[tokio::test]
    async fn unconfigured_token_closes_the_surface() {
        let mut parts = parts(Some("Bearer anything"));
        assert_eq!(
            AuthBearer::from_request_parts(&mut parts, &state(""))
                .await
                .err(),
            Some(AuthError::NotConfigured)
        );
    }

    #[test]
    fn token_match_requires_exact_value() {
        let state = state("sesame");
        assert!(state.token_matches("sesame"));
        assert!(!state.token_matches("sesam"));
        assert!(!state.token_matches("sesame "));
        assert!(!state.token_matches(""));
    }

    #[test]
    fn empty_configured_token_matches_nothing() {
        let state = state("");
        assert!(!state.token_matches(""));
        assert!(!state.token_matches("anything"));
    }
}
