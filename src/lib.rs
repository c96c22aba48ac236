//! Olivia: a real-time conversational backend with long-term memory.
//!
//! Clients hold one WebSocket per session. Each `message-in` frame becomes an
//! exchange: the user turn is persisted, a context is fused from semantically
//! similar past turns (from any of the user's conversations) and the current
//! transcript, a generator produces the reply, and the reply goes back as
//! `message-out`. Both sides of the exchange are then embedded and indexed in
//! the background, so later exchanges can recall them.
//!
//! # Architecture
//!
//! - **Transport**: axum WebSocket, authenticated once at the handshake from a
//!   signed cookie
//! - **Storage**: SQLite for identities, conversations and turns;
//!   a [sqlite-vec](https://github.com/asg017/sqlite-vec) `vec0` index of
//!   fragment vectors, partitioned by user
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions)
//! - **Generation**: Gemini `generateContent`
//!
//! # Modules
//!
//! - [`auth`]: credential verification and the connection gate
//! - [`config`]: TOML configuration with environment overrides
//! - [`db`]: schema, migrations and health checks
//! - [`embedding`]: text-to-vector providers
//! - [`error`]: error taxonomy
//! - [`generation`]: reply generators
//! - [`server`]: router and process lifecycle
//! - [`session`]: connection registry, exchange pipeline, memory fusion and writer
//! - [`socket`]: WebSocket upgrade and per-connection loop
//! - [`store`]: transcript store and memory index

pub mod auth;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod server;
pub mod session;
pub mod socket;
pub mod store;
