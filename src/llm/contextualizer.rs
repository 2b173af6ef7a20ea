//! Chunk contextualization over a chat-completions endpoint. One short
//! situating sentence per chunk; a chunk whose call fails comes back as an
//! empty string so the caller can fall back to the raw chunk without
//! throwing away the rest of the batch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Contextualizer, LlmError};

const SYSTEM_PROMPT: &str = "Situate the given chunk within the overall document \
in one or two short sentences, for retrieval purposes. Answer with the context only.";

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize, Debug)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct HttpContextualizer {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpContextualizer {
    pub fn new(client: reqwest::Client, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            model: model.into(),
        }
    }

    async fn context_for(
        &self,
        api_key: &str,
        document: &str,
        chunk: &str,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_owned(),
                    content: SYSTEM_PROMPT.to_owned(),
                },
                ChatMessage {
                    role: "user".to_owned(),
                    content: format!("<document>\n{document}\n</document>\n\n<chunk>\n{chunk}\n</chunk>"),
                },
            ],
            temperature: 0.0,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_owned())
            .ok_or_else(|| LlmError::BadResponse("no choices in response".to_owned()))
    }
}

#[async_trait]
impl Contextualizer for HttpContextualizer {
    async fn chunk_contexts(
        &self,
        api_key: &str,
        document: &str,
        chunks: &[String],
    ) -> Result<Vec<String>, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let mut contexts = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            match self.context_for(api_key, document, chunk).await {
                Ok(context) => contexts.push(context),
                Err(error) => {
                    warn!(index, ?error, "chunk contextualization failed, using raw chunk");
                    contexts.push(String::new());
                }
            }
        }
        Ok(contexts)
    }
}
