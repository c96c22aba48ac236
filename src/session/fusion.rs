//! Memory fusion: the context handed to the generator.
//!
//! A context is at most one synthetic entry carrying long-term fragments
//! (semantically similar past turns from any of the user's conversations),
//! followed by the full transcript of the current conversation in creation
//! order. Long-term retrieval is best-effort; the transcript is not.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::store::types::{Identity, MemoryFragment, Role, Turn};
use crate::store::{blocking, MemoryIndex, TranscriptStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Fragments,
    Transcript,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub source: EntrySource,
    pub role: Role,
    pub content: String,
}

impl ContextEntry {
    /// The synthetic long-term entry. Always attributed to the user.
    pub fn fragments(content: String) -> Self {
        Self {
            source: EntrySource::Fragments,
            role: Role::User,
            content,
        }
    }

    pub fn transcript(role: Role, content: String) -> Self {
        Self {
            source: EntrySource::Transcript,
            role,
            content,
        }
    }
}

/// Ordered entries for one generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionContext {
    entries: Vec<ContextEntry>,
}

impl FusionContext {
    pub fn from_entries(entries: Vec<ContextEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_fragments(&self) -> bool {
        self.entries
            .first()
            .is_some_and(|e| e.source == EntrySource::Fragments)
    }
}

/// Combine retrieved fragments and the transcript. Fragments keep their
/// similarity order; an empty fragment list adds no entry.
pub fn fuse(fragments: &[MemoryFragment], transcript: &[Turn], preamble: &str) -> FusionContext {
    let mut entries = Vec::with_capacity(transcript.len() + 1);
    if !fragments.is_empty() {
        let joined = fragments
            .iter()
            .map(|f| f.metadata.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        entries.push(ContextEntry::fragments(format!("{preamble}\n\n{joined}")));
    }
    entries.extend(
        transcript
            .iter()
            .map(|turn| ContextEntry::transcript(turn.role, turn.content.clone())),
    );
    FusionContext { entries }
}

pub struct MemoryFusion {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn MemoryIndex>,
    transcripts: Arc<dyn TranscriptStore>,
    max_fragments: usize,
    preamble: String,
}

impl MemoryFusion {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn MemoryIndex>,
        transcripts: Arc<dyn TranscriptStore>,
        max_fragments: usize,
        preamble: String,
    ) -> Self {
        Self {
            embedder,
            index,
            transcripts,
            max_fragments,
            preamble,
        }
    }

    /// Embed an utterance. `None` on failure; callers treat that as "no
    /// long-term memory for this exchange".
    pub async fn embed_utterance(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        match blocking(move || embedder.embed(&text)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "utterance embedding failed");
                None
            }
        }
    }

    /// Build the context for `conversation_id`. Fragment retrieval and
    /// transcript loading run concurrently. The transcript read happens after
    /// the caller persisted the new user turn, so that turn is its last entry.
    pub async fn assemble(
        &self,
        identity: &Identity,
        conversation_id: &str,
        utterance_vector: Option<&[f32]>,
    ) -> Result<FusionContext> {
        let (fragments, transcript) = tokio::join!(
            self.long_term(&identity.id, utterance_vector),
            self.short_term(conversation_id),
        );
        let transcript = transcript?;
        let context = fuse(&fragments, &transcript, &self.preamble);
        tracing::debug!(
            conversation = conversation_id,
            fragments = fragments.len(),
            turns = transcript.len(),
            "context assembled"
        );
        Ok(context)
    }

    async fn long_term(&self, user_id: &str, vector: Option<&[f32]>) -> Vec<MemoryFragment> {
        let Some(vector) = vector else {
            return Vec::new();
        };
        if self.max_fragments == 0 {
            return Vec::new();
        }
        let index = Arc::clone(&self.index);
        let user_id = user_id.to_string();
        let vector = vector.to_vec();
        let limit = self.max_fragments;
        match blocking(move || index.query_fragments(&user_id, &vector, limit)).await {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "fragment query failed; using transcript only");
                Vec::new()
            }
        }
    }

    async fn short_term(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let transcripts = Arc::clone(&self.transcripts);
        let conversation_id = conversation_id.to_string();
        blocking(move || transcripts.load_transcript(&conversation_id)).await
    }
}
