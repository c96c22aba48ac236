//! Handshake authentication: credential verification and the connection gate.

pub mod credential;
pub mod gate;

pub use credential::{Claims, CredentialVerifier, JwtVerifier};
pub use gate::ConnectionGate;
