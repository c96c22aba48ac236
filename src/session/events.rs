//! Socket event payloads.
//!
//! Frames are JSON objects `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "message-in")]
    MessageIn(MessageIn),
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message-out")]
    MessageOut(MessageOut),
}

/// A user utterance. Both fields are optional on the wire; a missing
/// conversation is caught by validation, not by parsing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageIn {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOut {
    pub conversation: String,
    pub content: String,
}
