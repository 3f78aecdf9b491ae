/// Session tokens: HS256 JWTs carrying the user id and session id.
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::UserId;
use crate::services::identity::AuthError;

pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 3600;

/// Clock skew tolerated past `exp`
pub const TOKEN_LEEWAY_SECS: i64 = 5;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Session ID; revoked on sign-out
    pub sid: String,
    /// Email address
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> UserId {
        UserId(self.sub.clone())
    }
}

/// Signing material, held by the application context
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiry_secs: i64,
}

impl JwtKeys {
    pub fn from_secret(secret: &[u8], expiry_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = TOKEN_LEEWAY_SECS as u64;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            expiry_secs,
        }
    }

    pub fn expiry_secs(&self) -> i64 {
        self.expiry_secs
    }

    /// Unix time after which a token with expiry `exp` no longer validates.
    pub fn valid_until(&self, exp: i64) -> i64 {
        exp + TOKEN_LEEWAY_SECS
    }

    /// Issue an access token for `user_id` within session `session_id`.
    pub fn issue(&self, user_id: &UserId, email: &str, session_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.expiry_secs)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Validate signature and expiry.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {}", e);
                AuthError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-that-is-at-least-32-bytes-long";

    #[test]
    fn test_issue_and_validate() {
        let keys = JwtKeys::from_secret(SECRET, ACCESS_TOKEN_EXPIRY_SECS);
        let token = keys
            .issue(&UserId::new("u123"), "jo@example.com", "session-1")
            .unwrap();

        let claims = keys.validate(&token).unwrap();
        assert_eq!(claims.user_id(), UserId::new("u123"));
        assert_eq!(claims.sid, "session-1");
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_EXPIRY_SECS);
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let keys = JwtKeys::from_secret(SECRET, ACCESS_TOKEN_EXPIRY_SECS);
        let other = JwtKeys::from_secret(b"another-secret-that-is-32-bytes-long!!", 3600);
        let token = other
            .issue(&UserId::new("u123"), "jo@example.com", "session-1")
            .unwrap();

        assert!(matches!(keys.validate(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = JwtKeys::from_secret(SECRET, -120);
        let token = keys
            .issue(&UserId::new("u123"), "jo@example.com", "session-1")
            .unwrap();

        assert!(matches!(keys.validate(&token), Err(AuthError::InvalidToken)));
    }
}
