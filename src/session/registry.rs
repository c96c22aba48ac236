//! Live connections and the identity each one was admitted with.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::events::ServerEvent;
use crate::store::types::Identity;

pub type ConnectionId = Uuid;

/// Per-connection record. The identity is fixed for the session's lifetime.
#[derive(Debug)]
pub struct Session {
    pub id: ConnectionId,
    pub identity: Identity,
    pub opened_at: DateTime<Utc>,
    outbox: UnboundedSender<ServerEvent>,
}

impl Session {
    /// Queue an event for this connection only. Once the connection is gone this
    /// is a no-op; returns whether the event was queued.
    pub fn emit(&self, event: ServerEvent) -> bool {
        match self.outbox.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(connection = %self.id, "connection closed; dropping event");
                false
            }
        }
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: Identity, outbox: UnboundedSender<ServerEvent>) -> Arc<Session> {
        let session = Arc::new(Session {
            id: Uuid::now_v7(),
            identity,
            opened_at: Utc::now(),
            outbox,
        });
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id, Arc::clone(&session));
        tracing::info!(connection = %session.id, user = %session.identity.id, "connection registered");
        session
    }

    /// Drop the session. In-flight work holding the `Arc` keeps running.
    pub fn release(&self, id: ConnectionId) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(session) = &removed {
            tracing::info!(
                connection = %id,
                connected_ms = (Utc::now() - session.opened_at).num_milliseconds(),
                "connection released"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
