//! Persistence collaborators used by the exchange pipeline.
//!
//! [`TranscriptStore`] owns identities, conversations and turns; [`MemoryIndex`]
//! owns long-term fragments. Both are synchronous (SQLite); async callers go
//! through [`blocking`]. [`SqliteStore`] implements both over one connection.

pub mod fragments;
pub mod transcript;
pub mod types;

use anyhow::Result;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

use types::{FragmentMetadata, Identity, MemoryFragment, NewTurn, Turn};

pub trait TranscriptStore: Send + Sync {
    fn find_identity(&self, user_id: &str) -> Result<Option<Identity>>;

    /// Append a turn. Fails if the conversation is unknown or not owned by the author.
    fn create_turn(&self, turn: &NewTurn) -> Result<Turn>;

    fn touch_conversation(&self, conversation_id: &str, at: &str) -> Result<()>;

    /// Turns of a conversation in creation order, oldest first.
    fn load_transcript(&self, conversation_id: &str) -> Result<Vec<Turn>>;
}

pub trait MemoryIndex: Send + Sync {
    fn index_fragment(&self, embedding: &[f32], metadata: &FragmentMetadata) -> Result<String>;

    /// Up to `limit` fragments owned by `user_id`, most similar first.
    fn query_fragments(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<MemoryFragment>>;
}

/// SQLite-backed implementation of both stores.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with the connection locked.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))
    }
}

impl TranscriptStore for SqliteStore {
    fn find_identity(&self, user_id: &str) -> Result<Option<Identity>> {
        transcript::find_user(&*self.lock()?, user_id)
    }

    fn create_turn(&self, turn: &NewTurn) -> Result<Turn> {
        transcript::insert_turn(&*self.lock()?, turn)
    }

    fn touch_conversation(&self, conversation_id: &str, at: &str) -> Result<()> {
        transcript::touch_conversation(&*self.lock()?, conversation_id, at)
    }

    fn load_transcript(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        transcript::load_transcript(&*self.lock()?, conversation_id)
    }
}

impl MemoryIndex for SqliteStore {
    fn index_fragment(&self, embedding: &[f32], metadata: &FragmentMetadata) -> Result<String> {
        fragments::insert_fragment(&*self.lock()?, embedding, metadata)
    }

    fn query_fragments(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<MemoryFragment>> {
        fragments::query_fragments(&*self.lock()?, user_id, embedding, limit)
    }
}

/// Run a synchronous store or embedding call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("blocking task failed: {e}"))?
}

/// Fixed-width UTC timestamp; lexical order equals chronological order.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}
