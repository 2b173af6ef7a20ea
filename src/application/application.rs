// This is where we will define the core application and all the related
// things on how to startup the service

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use once_cell::sync::OnceCell;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::db;
use crate::files::store::FileService;
use crate::indexes::worker::IndexWorker;
use crate::llm::contextualizer::HttpContextualizer;
use crate::llm::embedder::HttpEmbedder;
use crate::llm::rerank::HttpRerank;
use crate::llm::{Contextualizer, Embedder, RerankClient};
use crate::security::credential_store::{CredentialStore, MemoryCredentialStore};
use crate::security::envelope::EnvelopeCipher;

use super::config::configuration::Configuration;
use super::logging::tracing::tracing_subscribe;

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Clone)]
pub struct Application {
    pub config: Arc<Configuration>,
    pub sql: db::Db,
    pub service: Arc<FileService>,
    pub worker: Arc<IndexWorker>,
}

impl Application {
    pub async fn initialize(config: Configuration) -> Result<Self> {
        let config = Arc::new(config);
        let sql = Arc::new(db::init(&config).await?);

        let cipher = if config.search_enabled {
            let keks = config.kek_map()?;
            if keks.is_empty() {
                bail!("search is enabled but no encryption keks are configured");
            }
            Some(Arc::new(
                EnvelopeCipher::new(keks).context("building the envelope cipher")?,
            ))
        } else {
            None
        };

        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());

        let provider_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("building the provider http client")?;
        let rerank_client = reqwest::Client::builder()
            .timeout(config.rerank_timeout())
            .build()
            .context("building the rerank http client")?;

        let embedder: Option<Arc<dyn Embedder>> = if config.embedder_url.is_empty() {
            None
        } else {
            Some(Arc::new(HttpEmbedder::new(
                provider_client.clone(),
                config.embedder_url.clone(),
                config.embedder_model.clone(),
            )))
        };
        let contextualizer: Option<Arc<dyn Contextualizer>> = if config.contextualizer_url.is_empty()
        {
            None
        } else {
            Some(Arc::new(HttpContextualizer::new(
                provider_client,
                config.contextualizer_url.clone(),
                config.contextualizer_model.clone(),
            )))
        };
        let rerank: Option<Arc<dyn RerankClient>> = if config.rerank_url.is_empty() {
            None
        } else {
            Some(Arc::new(HttpRerank::new(
                rerank_client,
                config.rerank_url.clone(),
                config.rerank_model.clone(),
            )))
        };

        let service = Arc::new(FileService::new(
            sql.clone(),
            config.clone(),
            credentials.clone(),
            cipher.clone(),
            embedder.clone(),
            rerank,
        ));
        let worker = Arc::new(IndexWorker::new(
            sql.clone(),
            config.clone(),
            credentials,
            cipher,
            embedder,
            contextualizer,
        ));

        Ok(Self {
            config,
            sql,
            service,
            worker,
        })
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !tracing_subscribe(config) {
            warn!("Failed to install tracing_subscriber. There's probably one already...");
        };

        LOGGER_INSTALLED.set(true).unwrap();
    }

    /// Spawn the background index workers. They all stop when `shutdown`
    /// flips to true.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.index_workers)
            .map(|worker_id| {
                let worker = self.worker.clone();
                tokio::spawn(worker.run(worker_id, shutdown.clone()))
            })
            .collect()
    }
}
