//! Provider interfaces the indexing pipeline and search engine call on the
//! caller's behalf, plus reqwest implementations for HTTP providers. The
//! core never owns an api key of its own; every call is made with the key
//! handed over by the write (via the credential envelope) or the search
//! request itself.

pub mod contextualizer;
pub mod embedder;
pub mod rerank;

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("provider request failed")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}")]
    Api { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    BadResponse(String),
    #[error("no api key available for provider call")]
    MissingApiKey,
}

/// Batch text embedding. Implementations must return exactly one vector
/// per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_texts(&self, api_key: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Model identifier recorded next to stored embeddings.
    fn model(&self) -> &str;
}

/// Produces a short situating context per chunk, given the surrounding
/// document. One (possibly empty) string per chunk, in chunk order; an
/// empty string means "no context for this one" and the caller falls back
/// to the raw chunk.
#[async_trait]
pub trait Contextualizer: Send + Sync {
    async fn chunk_contexts(
        &self,
        api_key: &str,
        document: &str,
        chunks: &[String],
    ) -> Result<Vec<String>, LlmError>;
}

/// External relevance scoring over candidate documents. Scores come back
/// in document order; indices the provider omits default to 0.
#[async_trait]
pub trait RerankClient: Send + Sync {
    async fn rerank(
        &self,
        api_key: &str,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<f32>, LlmError>;
}
