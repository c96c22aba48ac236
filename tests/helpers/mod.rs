#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use rusqlite::params;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use olivia::config::OliviaConfig;
use olivia::db;
use olivia::embedding::EmbeddingProvider;
use olivia::error::GenerationError;
use olivia::generation::Generator;
use olivia::server::{AppState, ServerState};
use olivia::session::{FusionContext, ServerEvent, Session};
use olivia::store::types::Identity;
use olivia::store::{now_timestamp, transcript, SqliteStore};

pub const SECRET: &str = "integration-secret";
pub const ORIGIN: &str = "http://localhost:5173";
pub const DIMS: usize = 384;

/// In-memory store with schema and migrations applied.
pub fn test_store() -> SqliteStore {
    SqliteStore::new(db::open_memory_database().unwrap())
}

pub fn test_config() -> OliviaConfig {
    let mut config = OliviaConfig::default();
    config.auth.jwt_secret = SECRET.into();
    config.server.allowed_origins = vec![ORIGIN.into()];
    config
}

pub fn seed_user(store: &SqliteStore, email: &str, first_name: &str) -> Identity {
    store
        .with_conn(|conn| transcript::create_user(conn, email, first_name, "Tester"))
        .unwrap()
}

pub fn seed_conversation(store: &SqliteStore, user_id: &str) -> String {
    store
        .with_conn(|conn| transcript::create_conversation(conn, user_id, "test chat"))
        .unwrap()
}

/// Insert a conversation with a caller-chosen id.
pub fn seed_conversation_with_id(store: &SqliteStore, id: &str, user_id: &str) {
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, last_activity, created_at) VALUES (?1, ?2, 'chat', ?3, ?3)",
                params![id, user_id, now_timestamp()],
            )?;
            Ok(())
        })
        .unwrap();
}

pub fn fragment_count(store: &SqliteStore, conversation_id: &str) -> i64 {
    store
        .with_conn(|conn| olivia::store::fragments::count_fragments(conn, conversation_id))
        .unwrap()
}

/// Bag-of-words hashing embedder. Texts sharing words land close together.
pub struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| {
                    (h ^ b as u64).wrapping_mul(0x100000001b3)
                });
            v[(hash % DIMS as u64) as usize] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter_mut().for_each(|x| *x /= norm);
        Ok(v)
    }
}

pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding backend unavailable")
    }
}

/// Echoes the last context entry (or a fixed reply) and keeps every context
/// it was given.
#[derive(Default)]
pub struct RecordingGenerator {
    pub contexts: Mutex<Vec<FusionContext>>,
    reply: Option<String>,
}

impl RecordingGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            contexts: Mutex::default(),
            reply: Some(reply.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn last_context(&self) -> FusionContext {
        self.contexts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(
        &self,
        context: &FusionContext,
        identity: &Identity,
    ) -> Result<String, GenerationError> {
        self.contexts.lock().unwrap().push(context.clone());
        if let Some(reply) = &self.reply {
            return Ok(reply.clone());
        }
        let last = context
            .entries()
            .last()
            .map(|e| e.content.clone())
            .unwrap_or_default();
        Ok(format!("{}, you said: {last}", identity.first_name))
    }
}

pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(
        &self,
        _context: &FusionContext,
        _identity: &Identity,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Provider {
            status: 503,
            message: "overloaded".into(),
        })
    }
}

pub fn build_state(
    store: &SqliteStore,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
) -> AppState {
    ServerState::build(&test_config(), store.clone(), embedder, generator)
}

/// Register a session as if its handshake had been admitted.
pub fn open_session(
    state: &AppState,
    identity: Identity,
) -> (Arc<Session>, UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (state.registry.register(identity, tx), rx)
}

pub fn message_in(conversation: &str, content: &str) -> String {
    serde_json::json!({
        "event": "message-in",
        "data": {"conversation": conversation, "content": content},
    })
    .to_string()
}

/// Compact HS256 token for `user_id`.
pub fn sign_token(secret: &str, user_id: &str, exp: Option<i64>) -> String {
    let mut claims = serde_json::json!({"id": user_id, "iat": chrono::Utc::now().timestamp()});
    if let Some(exp) = exp {
        claims["exp"] = exp.into();
    }
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn valid_token(user_id: &str) -> String {
    sign_token(SECRET, user_id, Some(chrono::Utc::now().timestamp() + 3600))
}
