//! Per-connection conversation pipeline.
//!
//! - [`registry`]: admitted connections and their identities
//! - [`exchange`]: one message-in to message-out cycle
//! - [`fusion`]: long-term fragments plus transcript, as generator context
//! - [`writer`]: detached persistence and indexing after each reply
//! - [`events`]: wire payloads

pub mod events;
pub mod exchange;
pub mod fusion;
pub mod registry;
pub mod writer;

pub use events::{ClientEvent, MessageIn, MessageOut, ServerEvent};
pub use exchange::ExchangeOrchestrator;
pub use fusion::{ContextEntry, FusionContext, MemoryFusion};
pub use registry::{ConnectionId, ConnectionRegistry, Session};
pub use writer::{CompletedExchange, MemoryWriter, WriterStats};
