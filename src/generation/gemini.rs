//! Gemini `generateContent` over REST.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Generator;
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::session::fusion::FusionContext;
use crate::store::types::Identity;

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_instruction: String,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.api_key.is_empty(),
            "generation.api_key is empty; set it in config.toml or GEMINI_API_KEY"
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            system_instruction: config.system_instruction.clone(),
        })
    }

    fn build_request(&self, context: &FusionContext, identity: &Identity) -> GenerateContentRequest {
        let contents = context
            .entries()
            .iter()
            .map(|entry| Content {
                role: Some(entry.role.as_str().to_string()),
                parts: vec![Part {
                    text: entry.content.clone(),
                }],
            })
            .collect();

        let mut instruction = self.system_instruction.clone();
        let name = identity.display_name();
        if !name.trim().is_empty() {
            instruction.push_str(&format!("\nYou are talking with {name}."));
        }

        GenerateContentRequest {
            contents,
            system_instruction: (!instruction.trim().is_empty()).then(|| Content {
                role: None,
                parts: vec![Part { text: instruction }],
            }),
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        context: &FusionContext,
        identity: &Identity,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let body = self.build_request(context, identity);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &text));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(map_transport_error)?;
        extract_text(parsed)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn map_transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Transport(err.to_string())
    }
}

fn provider_error(status: StatusCode, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .and_then(|w| match (w.error.status, w.error.message) {
            (Some(s), Some(m)) => Some(format!("{s}: {m}")),
            (None, Some(m)) => Some(m),
            (Some(s), None) => Some(s),
            (None, None) => None,
        })
        .unwrap_or_else(|| body.to_string());
    GenerationError::Provider {
        status: status.as_u16(),
        message,
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, GenerationError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err(GenerationError::EmptyResponse)
    } else {
        Ok(text)
    }
}
