//! Shared harness for the integration tests: an embedded sqlite database
//! in a temp dir, the in-process credential store, a test KEK, and mock
//! providers for failure injection.

use std::sync::Arc;

use async_trait::async_trait;
use fileio::application::config::configuration::Configuration;
use fileio::db::{self, SqlDb};
use fileio::files::store::FileService;
use fileio::files::types::TenantAuth;
use fileio::indexes::worker::IndexWorker;
use fileio::llm::{Contextualizer, Embedder, LlmError, RerankClient};
use fileio::security::credential_store::{CredentialStore, MemoryCredentialStore};
use fileio::security::envelope::EnvelopeCipher;

pub const TEST_KEK: &str = "an-adequately-long-test-secret";

pub struct Harness {
    pub config: Arc<Configuration>,
    pub sql: Arc<SqlDb>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub cipher: Arc<EnvelopeCipher>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(mutate: impl FnOnce(&mut Configuration)) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = Configuration {
            index_dir: tmp.path().to_path_buf(),
            dsn: Some(db::sqlite_dsn(&tmp.path().join("fileio.db"))),
            encryption_keks: vec![format!("1={TEST_KEK}")],
            ..Configuration::default()
        };
        mutate(&mut config);
        let config = Arc::new(config);
        let sql = Arc::new(db::init(&config).await.expect("database init"));
        let cipher = Arc::new(EnvelopeCipher::new(config.kek_map().unwrap()).unwrap());
        let credentials = Arc::new(MemoryCredentialStore::new());
        Self {
            config,
            sql,
            credentials,
            cipher,
            _tmp: tmp,
        }
    }

    pub fn service(
        &self,
        embedder: Option<Arc<dyn Embedder>>,
        rerank: Option<Arc<dyn RerankClient>>,
    ) -> FileService {
        let credentials: Arc<dyn CredentialStore> = self.credentials.clone();
        FileService::new(
            self.sql.clone(),
            self.config.clone(),
            credentials,
            Some(self.cipher.clone()),
            embedder,
            rerank,
        )
    }

    pub fn worker(
        &self,
        embedder: Option<Arc<dyn Embedder>>,
        contextualizer: Option<Arc<dyn Contextualizer>>,
    ) -> IndexWorker {
        let credentials: Arc<dyn CredentialStore> = self.credentials.clone();
        IndexWorker::new(
            self.sql.clone(),
            self.config.clone(),
            credentials,
            Some(self.cipher.clone()),
            embedder,
            contextualizer,
        )
    }
}

pub fn auth_a() -> TenantAuth {
    TenantAuth::new("sk-tenant-a", "user-a")
}

pub fn auth_b() -> TenantAuth {
    TenantAuth::new("sk-tenant-b", "user-b")
}

/// Deterministic bag-of-tokens embedding: similar text lands on similar
/// dimensions, which is all cosine ranking needs in a test.
pub fn bag_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; 16];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let dim = token.bytes().map(u64::from).sum::<u64>() as usize % vector.len();
        vector[dim] += 1.0;
    }
    vector
}

pub struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_texts(&self, api_key: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(inputs.iter().map(|text| bag_vector(text)).collect())
    }

    fn model(&self) -> &str {
        "mock-embedder"
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_texts(&self, _: &str, _: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Err(LlmError::Api {
            status: 500,
            body: "embedding backend down".to_owned(),
        })
    }

    fn model(&self) -> &str {
        "failing-embedder"
    }
}

/// Scores 1.0 for documents containing the boost term, 0.0 otherwise.
pub struct BoostRerank {
    pub term: String,
}

#[async_trait]
impl RerankClient for BoostRerank {
    async fn rerank(&self, _: &str, _: &str, documents: &[String]) -> Result<Vec<f32>, LlmError> {
        Ok(documents
            .iter()
            .map(|doc| if doc.contains(&self.term) { 1.0 } else { 0.0 })
            .collect())
    }
}

pub struct FailingRerank;

#[async_trait]
impl RerankClient for FailingRerank {
    async fn rerank(&self, _: &str, _: &str, _: &[String]) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Api {
            status: 503,
            body: "rerank backend down".to_owned(),
        })
    }
}

pub struct StaticContextualizer {
    pub context: String,
}

#[async_trait]
impl Contextualizer for StaticContextualizer {
    async fn chunk_contexts(
        &self,
        api_key: &str,
        _document: &str,
        chunks: &[String],
    ) -> Result<Vec<String>, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(vec![self.context.clone(); chunks.len()])
    }
}
