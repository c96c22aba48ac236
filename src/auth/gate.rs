//! The connection gate: runs once per handshake, before any event is read.
//!
//! Checks, in order: origin allow-list, presence of the credential cookie,
//! credential verification, identity lookup. The first failure rejects the
//! whole connection.

use axum::http::header::{COOKIE, ORIGIN};
use axum::http::HeaderMap;
use std::sync::Arc;

use super::credential::CredentialVerifier;
use crate::error::AuthError;
use crate::store::types::Identity;
use crate::store::{blocking, TranscriptStore};

pub struct ConnectionGate {
    verifier: Arc<dyn CredentialVerifier>,
    identities: Arc<dyn TranscriptStore>,
    allowed_origins: Vec<String>,
    cookie_name: String,
}

impl ConnectionGate {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        identities: Arc<dyn TranscriptStore>,
        allowed_origins: Vec<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            identities,
            allowed_origins,
            cookie_name: cookie_name.into(),
        }
    }

    /// Admit or reject a handshake. Holds no state between calls.
    pub async fn admit(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        self.check_origin(headers)?;

        let token = credential_cookie(headers, &self.cookie_name).ok_or(AuthError::NoCredential)?;
        let claims = self.verifier.verify(&token)?;

        let identities = Arc::clone(&self.identities);
        let user_id = claims.id.clone();
        match blocking(move || identities.find_identity(&user_id)).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(AuthError::UnknownIdentity),
            Err(e) => {
                tracing::error!(user = %claims.id, error = %e, "identity lookup failed");
                Err(AuthError::InvalidCredential)
            }
        }
    }

    /// A missing `Origin` header (non-browser client) passes.
    fn check_origin(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(origin) = headers.get(ORIGIN) else {
            return Ok(());
        };
        let origin = origin.to_str().map_err(|_| AuthError::OriginNotAllowed)?;
        if self.allowed_origins.iter().any(|allowed| allowed == origin) {
            Ok(())
        } else {
            tracing::debug!(origin, "origin not in allow-list");
            Err(AuthError::OriginNotAllowed)
        }
    }
}

/// Value of cookie `name` across all `Cookie` headers, if present and non-empty.
fn credential_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::Claims;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts tokens of the form `ok:<user id>`.
    struct PrefixVerifier;

    impl CredentialVerifier for PrefixVerifier {
        fn verify(&self, token: &str) -> Result<Claims, AuthError> {
            token
                .strip_prefix("ok:")
                .map(|id| Claims {
                    id: id.to_string(),
                    exp: None,
                    iat: None,
                })
                .ok_or(AuthError::InvalidCredential)
        }
    }

    #[derive(Default)]
    struct OneUser {
        lookups: AtomicUsize,
    }

    impl TranscriptStore for OneUser {
        fn find_identity(&self, user_id: &str) -> anyhow::Result<Option<Identity>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok((user_id == "u1").then(|| Identity {
                id: "u1".into(),
                email: "u1@example.com".into(),
                first_name: "Una".into(),
                last_name: String::new(),
            }))
        }
        fn create_turn(
            &self,
            _turn: &crate::store::types::NewTurn,
        ) -> anyhow::Result<crate::store::types::Turn> {
            anyhow::bail!("not used")
        }
        fn touch_conversation(&self, _id: &str, _at: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn load_transcript(&self, _id: &str) -> anyhow::Result<Vec<crate::store::types::Turn>> {
            Ok(Vec::new())
        }
    }

    fn gate(store: Arc<OneUser>) -> ConnectionGate {
        ConnectionGate::new(
            Arc::new(PrefixVerifier),
            store,
            vec!["https://chat.example.com".into()],
            "token",
        )
    }

    fn headers(origin: Option<&str>, cookie: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert(ORIGIN, HeaderValue::from_str(origin).unwrap());
        }
        if let Some(cookie) = cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        headers
    }

    #[tokio::test]
    async fn admits_valid_credential() {
        let gate = gate(Arc::default());
        let identity = gate
            .admit(&headers(Some("https://chat.example.com"), Some("theme=dark; token=ok:u1")))
            .await
            .unwrap();
        assert_eq!(identity.id, "u1");
    }

    #[tokio::test]
    async fn missing_origin_header_is_admitted() {
        let gate = gate(Arc::default());
        assert!(gate.admit(&headers(None, Some("token=ok:u1"))).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_origin_is_rejected_even_with_valid_credential() {
        let store = Arc::new(OneUser::default());
        let gate = gate(Arc::clone(&store));
        let result = gate
            .admit(&headers(Some("https://evil.example"), Some("token=ok:u1")))
            .await;
        assert_eq!(result, Err(AuthError::OriginNotAllowed));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_or_empty_cookie_is_no_credential() {
        let gate = gate(Arc::default());
        assert_eq!(gate.admit(&headers(None, None)).await, Err(AuthError::NoCredential));
        assert_eq!(
            gate.admit(&headers(None, Some("theme=dark"))).await,
            Err(AuthError::NoCredential)
        );
        assert_eq!(
            gate.admit(&headers(None, Some("token="))).await,
            Err(AuthError::NoCredential)
        );
    }

    #[tokio::test]
    async fn invalid_credential_is_rejected_identically_twice() {
        let store = Arc::new(OneUser::default());
        let gate = gate(Arc::clone(&store));
        let bad = headers(None, Some("token=forged"));
        let first = gate.admit(&bad).await;
        let second = gate.admit(&bad).await;
        assert_eq!(first, Err(AuthError::InvalidCredential));
        assert_eq!(first, second);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_subject_is_rejected() {
        let gate = gate(Arc::default());
        assert_eq!(
            gate.admit(&headers(None, Some("token=ok:ghost"))).await,
            Err(AuthError::UnknownIdentity)
        );
    }

    #[test]
    fn cookie_lookup_spans_multiple_headers() {
        let mut map = HeaderMap::new();
        map.append(COOKIE, HeaderValue::from_static("a=1"));
        map.append(COOKIE, HeaderValue::from_static("b=2; token=\"abc\""));
        assert_eq!(credential_cookie(&map, "token").as_deref(), Some("abc"));
        assert_eq!(credential_cookie(&map, "tok"), None);
    }
}
