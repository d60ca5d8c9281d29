//! Bearer tokens issued by the external auth service.
//!
//! The chat service never authenticates anyone. It only checks the HS256
//! signature on a token the auth service already issued and reads the
//! `(subject, role)` pair out of it.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
    #[serde(other)]
    Unknown,
}

/// Claims carried by an auth-service token.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// A validated identity attached to a request or a viewer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid or expired token")]
pub struct TokenError(#[from] jsonwebtoken::errors::Error);

/// Signing material shared with the auth service.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verify signature and expiry, returning the carried identity.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let data = jsonwebtoken::decode::<IdentityClaims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(Identity {
            subject: data.claims.sub,
            role: data.claims.role,
        })
    }

    /// Mint a token. The auth service owns issuance; this exists for
    /// operators and tests sharing the same secret.
    pub fn issue(&self, subject: &str, role: Role, ttl_secs: i64) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = IdentityClaims {
            sub: subject.to_string(),
            role,
            iat: now,
            exp: now + ttl_secs,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_admin_token_verifies() {
        let keys = TokenKeys::from_secret("test-secret");
        let token = keys.issue("alice", Role::Admin, 300).unwrap();
        let identity = keys.verify(&token).unwrap();
        assert_eq!(identity.subject, "alice");
        assert!(identity.is_admin());
    }

    #[test]
    fn user_role_is_not_admin() {
        let keys = TokenKeys::from_secret("test-secret");
        let token = keys.issue("bob", Role::User, 300).unwrap();
        assert!(!keys.verify(&token).unwrap().is_admin());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = TokenKeys::from_secret("one").issue("alice", Role::Admin, 300).unwrap();
        assert!(TokenKeys::from_secret("two").verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = TokenKeys::from_secret("test-secret");
        let token = keys.issue("alice", Role::Admin, -600).unwrap();
        assert!(keys.verify(&token).is_err());
    }
}
