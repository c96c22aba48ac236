//! all-MiniLM-L6-v2 on ONNX Runtime.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// The only model this provider can run; `embedding.model` must name it.
pub const MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// Chat turns longer than this many tokens are truncated before inference.
const MAX_TOKENS: usize = 256;

pub struct MiniLmProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Tokenizer is Send + Sync; the ONNX session is only touched through the Mutex.
unsafe impl Send for MiniLmProvider {}
unsafe impl Sync for MiniLmProvider {}

/// Where `olivia model download` puts the model and tokenizer.
pub fn model_files(config: &EmbeddingConfig) -> (PathBuf, PathBuf) {
    let dir = crate::config::expand_tilde(&config.cache_dir);
    (dir.join("model.onnx"), dir.join("tokenizer.json"))
}

impl MiniLmProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_path, tokenizer_path) = model_files(config);
        for path in [&model_path, &tokenizer_path] {
            anyhow::ensure!(
                path.exists(),
                "{} is missing. Run `olivia model download` first.",
                path.display()
            );
        }

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tracing::info!(model = %model_path.display(), "embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Token embeddings for one encoding, flattened `[seq_len * EMBEDDING_DIM]`.
    fn token_embeddings(&self, encoding: &Encoding) -> Result<Vec<f32>> {
        let seq_len = encoding.get_ids().len();
        let shape = vec![1i64, seq_len as i64];
        let as_i64 = |xs: &[u32]| xs.iter().map(|&x| x as i64).collect::<Vec<_>>();

        let input_ids = Tensor::from_array((shape.clone(), as_i64(encoding.get_ids()).into_boxed_slice()))?;
        let attention_mask = Tensor::from_array((
            shape.clone(),
            as_i64(encoding.get_attention_mask()).into_boxed_slice(),
        ))?;
        let token_type_ids = Tensor::from_array((shape, vec![0i64; seq_len].into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("onnx session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        })?;

        let value = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .unwrap_or_else(|| &outputs[0]);
        let (dims, data) = value
            .try_extract_tensor::<f32>()
            .context("model output is not an f32 tensor")?;
        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims == [1, seq_len as i64, EMBEDDING_DIM as i64],
            "unexpected model output shape {dims:?}"
        );

        Ok(data.to_vec())
    }
}

impl EmbeddingProvider for MiniLmProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;
        let tokens = self.token_embeddings(&encoding)?;
        let pooled = mean_pool(&tokens, encoding.get_attention_mask(), EMBEDDING_DIM);
        Ok(l2_normalize(pooled))
    }
}

/// Average the token rows whose attention mask is set.
fn mean_pool(tokens: &[f32], mask: &[u32], dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dim];
    let mut count = 0usize;
    for (row, _) in tokens.chunks_exact(dim).zip(mask).filter(|(_, m)| **m > 0) {
        sum.iter_mut().zip(row).for_each(|(acc, x)| *acc += x);
        count += 1;
    }
    if count > 0 {
        sum.iter_mut().for_each(|x| *x /= count as f32);
    }
    sum
}

/// Scale to unit length. A zero vector stays zero.
fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_ignores_masked_tokens() {
        let tokens = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let pooled = mean_pool(&tokens, &[1, 1, 0], 2);
        assert_eq!(pooled, vec![2.0, 3.0]);
    }

    #[test]
    fn mean_pool_with_empty_mask_is_zero() {
        assert_eq!(mean_pool(&[5.0, 5.0], &[0], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn l2_normalize_scales_to_unit() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    #[ignore] // needs model files: cargo test -- --ignored
    fn embeds_to_unit_vectors_of_model_width() {
        let provider = MiniLmProvider::new(&EmbeddingConfig::default()).unwrap();
        let v = provider.embed("what did I say about my sister's wedding?").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    #[ignore]
    fn same_text_embeds_identically() {
        let provider = MiniLmProvider::new(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.embed("hello").unwrap(), provider.embed("hello").unwrap());
    }
}
