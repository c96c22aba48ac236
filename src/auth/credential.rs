//! Bearer credential verification.
//!
//! Credentials are compact HS256 JSON Web Tokens whose payload carries the user
//! id (`id`, or `sub`) and an optional `exp`. Issuing tokens is the login
//! service's job; this module only checks them.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::AuthError;

/// Verified token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Subject user id.
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

pub trait CredentialVerifier: Send + Sync {
    /// Check signature and expiry. Any failure is [`AuthError::InvalidCredential`].
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Tokens without `exp` never expire; `aud` is not part of the contract.
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "credential rejected");
                AuthError::InvalidCredential
            })?
            .claims;
        if claims.id.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        Ok(claims)
    }
}
