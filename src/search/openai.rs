//! OpenAI embeddings provider (`POST /v1/embeddings`).
//!
//! One request per text, no retries: a failure is returned to the caller,
//! which decides whether to skip the unit or abort the request.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use super::embedding::EmbeddingProvider;
use crate::core::config::EmbeddingConfig;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbedder {
    /// Requires `embedding.model`, `embedding.dims` and the API key variable
    /// named by `embedding.api_key_env`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            endpoint: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
            client,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dims,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("OpenAI embeddings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json()?;
        let embedding = parse_embedding_response(&json)?;
        if embedding.len() != self.dims {
            bail!(
                "OpenAI returned {} dimensions, configured for {}",
                embedding.len(),
                self.dims
            );
        }
        Ok(embedding)
    }
}

/// `data[0].embedding` of an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data[0].embedding"))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid OpenAI response: non-numeric embedding value"))
        })
        .collect()
}
