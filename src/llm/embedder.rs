//! OpenAI-compatible `/embeddings` client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Embedder, LlmError};

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_texts(&self, api_key: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: inputs,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != inputs.len() {
            return Err(LlmError::BadResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }
        let mut rows = parsed.data;
        rows.sort_by_key(|row| row.index);
        Ok(rows.into_iter().map(|row| row.embedding).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
