pub mod stats;

use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use olivia::config::EmbeddingConfig;
use olivia::embedding::local::{model_files, MODEL_NAME};

const HF_BASE: &str = "https://huggingface.co/sentence-transformers";

/// Fetch the ONNX model and tokenizer into the embedding cache directory.
/// Files already present are left alone.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let (model_path, tokenizer_path) = model_files(config);
    let model_url = format!("{HF_BASE}/{MODEL_NAME}/resolve/main/onnx/model.onnx");
    let tokenizer_url = format!("{HF_BASE}/{MODEL_NAME}/resolve/main/tokenizer.json");
    for (label, url, dest) in [
        ("model.onnx (~90MB)", &model_url, &model_path),
        ("tokenizer.json", &tokenizer_url, &tokenizer_path),
    ] {
        if dest.exists() {
            println!("{label}: already at {}", dest.display());
            continue;
        }
        if let Some(dir) = dest.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        println!("Downloading {label}...");
        download_file(url, dest).await?;
        println!("Saved to {}", dest.display());
    }

    println!("Embedding model ready.");
    Ok(())
}

/// Stream `url` to `dest` through a `.tmp` sibling, renamed on success.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "download of {url} failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("error reading response body")?;
        file.write_all(&chunk).await.context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to move download into place")?;
    pb.finish_and_clear();
    Ok(())
}
