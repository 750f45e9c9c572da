use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{Subject, TokenVerifier};
use crate::error::FeedError;

/// Authenticated caller (required).
/// Rejects the request with 401 when the bearer token is missing or invalid.
#[async_trait]
impl<S> FromRequestParts<S> for Subject
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = FeedError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = TokenVerifier::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        verifier.verify_header(header).inspect_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer credential");
        })
    }
}
