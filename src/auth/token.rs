use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{FeedError, Result};

/// The verified identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: String,
    /// Display name, when the token carries one.
    pub username: Option<String>,
}

/// Claims accepted from the identity service. Older tokens put the user id
/// in `userId` instead of `sub`.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    username: Option<String>,
}

/// Verifies HS256 bearer tokens against a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    #[must_use]
    pub fn hs256(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(validation),
        }
    }

    /// Verify a token (without the `Bearer ` prefix).
    pub fn verify(&self, token: &str) -> Result<Subject> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| FeedError::Unauthorized(format!("Invalid token: {e}")))?;

        let claims = data.claims;
        let user_id = claims
            .sub
            .or(claims.user_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FeedError::Unauthorized("Token has no subject".to_string()))?;

        Ok(Subject {
            user_id,
            username: claims.username.filter(|name| !name.is_empty()),
        })
    }

    /// Verify the value of an `Authorization` header.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Subject> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FeedError::Unauthorized("No token provided".to_string()))?;
        self.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn token(secret: &str, claims: &serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_verify_sub_claim() {
        let verifier = TokenVerifier::hs256("secret");
        let t = token(
            "secret",
            &serde_json::json!({ "sub": "u1", "username": "alice", "exp": far_future() }),
        );
        let subject = verifier.verify(&t).unwrap();
        assert_eq!(subject.user_id, "u1");
        assert_eq!(subject.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_verify_legacy_user_id_claim() {
        let verifier = TokenVerifier::hs256("secret");
        let t = token("secret", &serde_json::json!({ "userId": "u2", "exp": far_future() }));
        let subject = verifier.verify(&t).unwrap();
        assert_eq!(subject.user_id, "u2");
        assert_eq!(subject.username, None);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = TokenVerifier::hs256("secret");
        let t = token("other", &serde_json::json!({ "sub": "u1", "exp": far_future() }));
        assert!(matches!(verifier.verify(&t), Err(FeedError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::hs256("secret");
        let t = token("secret", &serde_json::json!({ "sub": "u1", "exp": 1_000 }));
        assert!(verifier.verify(&t).is_err());
    }

    #[test]
    fn test_header_requires_bearer_scheme() {
        let verifier = TokenVerifier::hs256("secret");
        assert!(verifier.verify_header(None).is_err());
        assert!(verifier.verify_header(Some("Basic abc")).is_err());
        assert!(verifier.verify_header(Some("Bearer ")).is_err());
    }
}
