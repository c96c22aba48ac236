//! One request-response cycle on an admitted connection.
//!
//! Validate, persist the user turn, assemble context, generate, reply. Memory
//! writes are handed to the [`MemoryWriter`] after the reply is emitted. Errors
//! never cross back to the client; they are logged here and the exchange ends.

use std::sync::Arc;

use tracing::Instrument;

use super::events::{MessageIn, MessageOut, ServerEvent};
use super::fusion::MemoryFusion;
use super::registry::Session;
use super::writer::{CompletedExchange, MemoryWriter};
use crate::error::ExchangeError;
use crate::generation::Generator;
use crate::store::types::{NewTurn, Role};
use crate::store::{blocking, TranscriptStore};

pub struct ExchangeOrchestrator {
    transcripts: Arc<dyn TranscriptStore>,
    fusion: MemoryFusion,
    generator: Arc<dyn Generator>,
    writer: MemoryWriter,
    min_conversation_id_len: usize,
}

impl ExchangeOrchestrator {
    pub fn new(
        transcripts: Arc<dyn TranscriptStore>,
        fusion: MemoryFusion,
        generator: Arc<dyn Generator>,
        writer: MemoryWriter,
        min_conversation_id_len: usize,
    ) -> Self {
        Self {
            transcripts,
            fusion,
            generator,
            writer,
            min_conversation_id_len,
        }
    }

    pub fn writer(&self) -> &MemoryWriter {
        &self.writer
    }

    /// Run an exchange and log its outcome. Never fails.
    pub async fn handle(&self, session: &Session, message: MessageIn) {
        let span = tracing::info_span!(
            "exchange",
            connection = %session.id,
            user = %session.identity.id,
            conversation = message.conversation.as_deref().unwrap_or(""),
        );
        async {
            match self.run(session, message).await {
                Ok(_) => tracing::debug!("reply emitted"),
                Err(e @ ExchangeError::MalformedConversationId { .. }) => {
                    tracing::debug!(error = %e, "message dropped")
                }
                Err(e @ ExchangeError::Persistence(_)) => {
                    tracing::error!(error = %e, "exchange aborted")
                }
                Err(e @ ExchangeError::Generation(_)) => {
                    tracing::warn!(error = %e, "exchange aborted")
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run an exchange. On success the reply has been queued on `session` and
    /// the background writes are spawned.
    pub async fn run(
        &self,
        session: &Session,
        message: MessageIn,
    ) -> Result<MessageOut, ExchangeError> {
        let identity = &session.identity;
        let conversation_id = self.validate(message.conversation)?;
        let content = message.content;

        let new_turn = NewTurn {
            conversation_id: conversation_id.clone(),
            author_id: identity.id.clone(),
            role: Role::User,
            content: content.clone(),
        };
        let transcripts = Arc::clone(&self.transcripts);
        let (user_turn, user_vector) = tokio::join!(
            blocking(move || transcripts.create_turn(&new_turn)),
            self.fusion.embed_utterance(&content),
        );
        let user_turn = user_turn.map_err(ExchangeError::Persistence)?;

        let (touched, context) = tokio::join!(
            self.touch(&conversation_id, user_turn.created_at.clone()),
            self.fusion
                .assemble(identity, &conversation_id, user_vector.as_deref()),
        );
        if let Err(e) = touched {
            tracing::warn!(error = %format!("{e:#}"), "failed to update conversation activity");
        }
        let context = context.map_err(ExchangeError::Persistence)?;
        tracing::debug!(
            entries = context.len(),
            recalled = context.has_fragments(),
            "context assembled"
        );

        let reply = self.generator.generate(&context, identity).await?;

        let out = MessageOut {
            conversation: conversation_id,
            content: reply.clone(),
        };
        session.emit(ServerEvent::MessageOut(out.clone()));

        self.writer.record(CompletedExchange {
            identity: identity.clone(),
            user_turn,
            user_vector,
            reply,
        });
        Ok(out)
    }

    fn validate(&self, conversation: Option<String>) -> Result<String, ExchangeError> {
        match conversation {
            Some(id) if id.chars().count() >= self.min_conversation_id_len => Ok(id),
            _ => Err(ExchangeError::MalformedConversationId {
                min: self.min_conversation_id_len,
            }),
        }
    }

    async fn touch(&self, conversation_id: &str, at: String) -> anyhow::Result<()> {
        let transcripts = Arc::clone(&self.transcripts);
        let conversation_id = conversation_id.to_string();
        blocking(move || transcripts.touch_conversation(&conversation_id, &at)).await
    }
}
