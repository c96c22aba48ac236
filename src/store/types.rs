//! Records shared by the transcript store and the long-term memory index.
//!
//! [`Identity`] is the resolved user behind a connection, [`Turn`] one immutable
//! transcript entry, and [`MemoryFragment`] a retrievable long-term memory derived
//! from a turn.

use serde::{Deserialize, Serialize};

/// The user principal bound to a connection once the gate admits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Identity {
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

/// Author role of a turn, in the generation provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "model" => Ok(Self::Model),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A turn about to be appended to a conversation.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub conversation_id: String,
    pub author_id: String,
    pub role: Role,
    pub content: String,
}

/// One message in a conversation, as stored. Never edited after insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: String,
    /// Creation order across the whole store; higher means later.
    pub seq: i64,
    pub conversation_id: String,
    pub author_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// Where a fragment came from. `text` is the exact content of the source turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub conversation_id: String,
    pub user_id: String,
    pub text: String,
    pub turn_id: String,
}

impl FragmentMetadata {
    pub fn for_turn(turn: &Turn) -> Self {
        Self {
            conversation_id: turn.conversation_id.clone(),
            user_id: turn.author_id.clone(),
            text: turn.content.clone(),
            turn_id: turn.id.clone(),
        }
    }
}

/// A long-term memory hit returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryFragment {
    pub id: String,
    pub metadata: FragmentMetadata,
    /// Cosine distance to the query vector; smaller is more similar.
    pub distance: f64,
}
