//! Text-to-vector embedding.
//!
//! [`EmbeddingProvider`] is the collaborator behind both retrieval (the new
//! utterance) and indexing (both sides of an exchange). Providers are built from
//! configuration by [`create_provider`].

pub mod local;

use anyhow::Result;

/// Dimensions of all-MiniLM-L6-v2 vectors.
pub const EMBEDDING_DIM: usize = 384;

/// Turns text into an L2-normalized vector.
///
/// Calls are synchronous and CPU-bound; async callers wrap them in
/// [`crate::store::blocking`].
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Build the configured provider. Only `"local"` exists today; it needs the
/// model files fetched by `olivia model download`.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Box::new(local::MiniLmProvider::new(config)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}
