//! Detached memory writes.
//!
//! After a reply is emitted, both sides of the exchange are indexed as memory
//! fragments and the model turn is appended to the transcript. None of this is
//! on the reply path: failures are logged and counted, never surfaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::embedding::EmbeddingProvider;
use crate::error::WriteError;
use crate::store::types::{FragmentMetadata, Identity, NewTurn, Role, Turn};
use crate::store::{blocking, MemoryIndex, TranscriptStore};

/// Everything the writer needs once a reply has gone out.
#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub identity: Identity,
    pub user_turn: Turn,
    /// The utterance vector computed for retrieval, reused for indexing.
    pub user_vector: Option<Vec<f32>>,
    pub reply: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub indexed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    indexed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone)]
pub struct MemoryWriter {
    transcripts: Arc<dyn TranscriptStore>,
    index: Arc<dyn MemoryIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl MemoryWriter {
    pub fn new(
        transcripts: Arc<dyn TranscriptStore>,
        index: Arc<dyn MemoryIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            transcripts,
            index,
            embedder,
            tracker: TaskTracker::new(),
            counters: Arc::default(),
        }
    }

    /// Spawn the writes for one exchange: the user turn is indexed, and the
    /// model turn is persisted then indexed. The two run independently.
    pub fn record(&self, exchange: CompletedExchange) {
        let CompletedExchange {
            identity,
            user_turn,
            user_vector,
            reply,
        } = exchange;

        let conversation_id = user_turn.conversation_id.clone();
        self.index_turn(user_turn, user_vector);

        let writer = self.clone();
        self.tracker.spawn(async move {
            let result = writer
                .persist_reply(&identity, &conversation_id, reply)
                .await;
            writer.finish(result, Role::Model, &conversation_id);
        });
    }

    /// Spawn indexing of an already persisted turn. A precomputed vector skips
    /// the embedding call.
    pub fn index_turn(&self, turn: Turn, vector: Option<Vec<f32>>) {
        let writer = self.clone();
        self.tracker.spawn(async move {
            let role = turn.role;
            let conversation_id = turn.conversation_id.clone();
            let result = writer.index(turn, vector).await;
            writer.finish(result, role, &conversation_id);
        });
    }

    async fn persist_reply(
        &self,
        identity: &Identity,
        conversation_id: &str,
        reply: String,
    ) -> Result<String, WriteError> {
        let transcripts = Arc::clone(&self.transcripts);
        let new_turn = NewTurn {
            conversation_id: conversation_id.to_string(),
            author_id: identity.id.clone(),
            role: Role::Model,
            content: reply,
        };
        let turn = blocking(move || transcripts.create_turn(&new_turn))
            .await
            .map_err(WriteError::Persistence)?;
        self.index(turn, None).await
    }

    async fn index(&self, turn: Turn, vector: Option<Vec<f32>>) -> Result<String, WriteError> {
        let metadata = FragmentMetadata::for_turn(&turn);
        let vector = match vector {
            Some(v) => v,
            None => {
                let embedder = Arc::clone(&self.embedder);
                let text = turn.content;
                blocking(move || embedder.embed(&text))
                    .await
                    .map_err(WriteError::Embedding)?
            }
        };
        let index = Arc::clone(&self.index);
        blocking(move || index.index_fragment(&vector, &metadata))
            .await
            .map_err(WriteError::Index)
    }

    fn finish(&self, result: Result<String, WriteError>, role: Role, conversation_id: &str) {
        match result {
            Ok(fragment_id) => {
                self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%role, conversation = conversation_id, fragment = %fragment_id, "fragment indexed");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%role, conversation = conversation_id, error = %e, "memory write failed");
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            indexed: self.counters.indexed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every write spawned so far. New writes can still be spawned
    /// afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
