//! Error taxonomy of the conversation pipeline.
//!
//! Only [`AuthError`] ever reaches a client, as the rejection reason of a
//! handshake. Everything else stops at the exchange boundary and is logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Why the connection gate refused a handshake. `Display` is the reason string
/// sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("NoCredential")]
    NoCredential,
    #[error("InvalidCredential")]
    InvalidCredential,
    #[error("UnknownIdentity")]
    UnknownIdentity,
    #[error("OriginNotAllowed")]
    OriginNotAllowed,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::OriginNotAllowed => StatusCode::FORBIDDEN,
            Self::NoCredential | Self::InvalidCredential | Self::UnknownIdentity => {
                StatusCode::UNAUTHORIZED
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("generation request failed: {0}")]
    Transport(String),
    #[error("generation provider returned {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("generation provider returned no text")]
    EmptyResponse,
}

/// Reasons one exchange ends without a reply.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("conversation id missing or shorter than {min} characters")]
    MalformedConversationId { min: usize },
    #[error("failed to persist user turn: {0:#}")]
    Persistence(anyhow::Error),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Failure of one detached memory write.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("failed to persist model turn: {0:#}")]
    Persistence(anyhow::Error),
    #[error("failed to index fragment: {0:#}")]
    Index(anyhow::Error),
}
