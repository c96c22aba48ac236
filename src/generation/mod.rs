//! Reply generation.
//!
//! The pipeline hands a [`FusionContext`] and the caller's [`Identity`] to a
//! [`Generator`] and gets text back. Timeouts are the generator's business.

pub mod gemini;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::session::fusion::FusionContext;
use crate::store::types::Identity;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the model's reply. `identity` is for personalisation only.
    async fn generate(
        &self,
        context: &FusionContext,
        identity: &Identity,
    ) -> Result<String, GenerationError>;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(gemini::GeminiGenerator::new(config)?)),
        other => anyhow::bail!("unknown generation provider: {other}. Supported: gemini"),
    }
}
