use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::error::AccessError;
use crate::utils::generate_random_token;

const REFRESH_ENTROPY_BYTES: usize = 32;

/// Signs and decodes access tokens. The session record, not the token, is
/// the authority on expiry and revocation.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

/// Claims carried by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalClaims {
    /// Subject (principal ID)
    pub sub: String,
    /// Session the token belongs to
    pub sid: Uuid,
    /// Unique per issued token
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Credentials handed back to the client.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(signing_secret: &Secret<String>) -> Result<Self, AccessError> {
        let secret = signing_secret.expose_secret();
        if secret.len() < 32 {
            return Err(AccessError::ValidationError(
                "Token signing secret must be at least 32 bytes".to_string(),
            ));
        }

        tracing::info!("Token service initialized with HS256 key");
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    pub fn issue_access_token(
        &self,
        principal_id: &str,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String, AccessError> {
        let claims = PrincipalClaims {
            sub: principal_id.to_string(),
            sid: session_id,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AccessError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Checks the signature only. Expiry lives on the session.
    pub fn decode_access_token(&self, token: &str) -> Result<PrincipalClaims, AccessError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        decode::<PrincipalClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected access token");
                AccessError::InvalidToken
            })
    }

    /// Opaque `<session-id>.<random>` refresh token.
    pub fn issue_refresh_token(&self, session_id: Uuid) -> String {
        format!("{}.{}", session_id, generate_random_token(REFRESH_ENTROPY_BYTES))
    }

    pub fn refresh_session_id(token: &str) -> Option<Uuid> {
        let (session_id, secret) = token.split_once('.')?;
        if secret.is_empty() {
            return None;
        }
        Uuid::parse_str(session_id).ok()
    }
}
