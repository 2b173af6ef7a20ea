use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    #[clap(long, default_value_os_t = default_index_dir())]
    #[serde(default = "default_index_dir")]
    /// Directory for persistent state (embedded database, logs)
    pub index_dir: PathBuf,

    #[clap(long)]
    #[serde(default)]
    /// Database DSN; postgres://... or sqlite://... Defaults to an
    /// embedded sqlite database under the index directory
    pub dsn: Option<String>,

    #[clap(long, default_value_t = default_sql_max_connections())]
    #[serde(default = "default_sql_max_connections")]
    /// Connection pool size
    pub sql_max_connections: u32,

    #[clap(long, default_value_t = default_max_payload_bytes())]
    #[serde(default = "default_max_payload_bytes")]
    /// Max bytes per write payload
    pub max_payload_bytes: u64,

    #[clap(long, default_value_t = default_max_file_bytes())]
    #[serde(default = "default_max_file_bytes")]
    /// Max bytes per file after a write
    pub max_file_bytes: u64,

    #[clap(long, default_value_t = default_max_project_bytes())]
    #[serde(default = "default_max_project_bytes")]
    /// Max summed bytes of active files within one project
    pub max_project_bytes: u64,

    #[clap(long, default_value_t = default_lock_timeout_ms())]
    #[serde(default = "default_lock_timeout_ms")]
    /// Project-lock wait budget per mutation, in milliseconds
    pub lock_timeout_ms: u64,

    #[clap(long, default_value_t = default_delete_retention_days())]
    #[serde(default = "default_delete_retention_days")]
    /// How long soft-deleted rows are kept for retention sweeps
    pub delete_retention_days: u64,

    #[clap(long, action = clap::ArgAction::Set, default_value_t = default_search_enabled())]
    #[serde(default = "default_search_enabled")]
    /// When false, writes skip credential handoff and search returns empty
    pub search_enabled: bool,

    #[clap(long, default_value_t = default_search_limit_default())]
    #[serde(default = "default_search_limit_default")]
    pub search_limit_default: i64,

    #[clap(long, default_value_t = default_search_limit_max())]
    #[serde(default = "default_search_limit_max")]
    pub search_limit_max: i64,

    #[clap(long, default_value_t = default_list_limit_default())]
    #[serde(default = "default_list_limit_default")]
    pub list_limit_default: i64,

    #[clap(long, default_value_t = default_list_limit_max())]
    #[serde(default = "default_list_limit_max")]
    pub list_limit_max: i64,

    #[clap(long, default_value_t = default_vector_candidates())]
    #[serde(default = "default_vector_candidates")]
    /// Semantic candidate pool size per query
    pub vector_candidates: i64,

    #[clap(long, default_value_t = default_lexical_candidates())]
    #[serde(default = "default_lexical_candidates")]
    /// Lexical candidate pool size per query
    pub lexical_candidates: i64,

    #[clap(long, default_value_t = default_semantic_weight())]
    #[serde(default = "default_semantic_weight")]
    /// Fusion weight for semantic scores; re-normalized with the lexical
    /// weight when the two do not sum to 1
    pub semantic_weight: f64,

    #[clap(long, default_value_t = default_lexical_weight())]
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,

    #[clap(long, default_value_t = default_rerank_timeout_ms())]
    #[serde(default = "default_rerank_timeout_ms")]
    /// Per-rerank-call deadline, in milliseconds
    pub rerank_timeout_ms: u64,

    #[clap(long, default_value_t = default_request_timeout_ms())]
    #[serde(default = "default_request_timeout_ms")]
    /// Deadline for embedder/contextualizer calls, in milliseconds
    pub request_timeout_ms: u64,

    #[clap(long, default_value_t = default_index_workers())]
    #[serde(default = "default_index_workers")]
    /// Background index worker count
    pub index_workers: usize,

    #[clap(long, default_value_t = default_index_batch_size())]
    #[serde(default = "default_index_batch_size")]
    /// Jobs claimed per worker pass
    pub index_batch_size: i64,

    #[clap(long, default_value_t = default_index_retry_max())]
    #[serde(default = "default_index_retry_max")]
    pub index_retry_max: i64,

    #[clap(long, default_value_t = default_index_retry_backoff_ms())]
    #[serde(default = "default_index_retry_backoff_ms")]
    /// Linear backoff base: retry n waits n * backoff
    pub index_retry_backoff_ms: u64,

    #[clap(long, default_value_t = default_index_chunk_bytes())]
    #[serde(default = "default_index_chunk_bytes")]
    /// Chunker budget per chunk, in bytes
    pub index_chunk_bytes: usize,

    #[clap(long, default_value_t = default_index_freshness_slo_secs())]
    #[serde(default = "default_index_freshness_slo_secs")]
    /// Target p95 delay from write to searchable; a target, not a contract
    pub index_freshness_slo_secs: u64,

    #[clap(long, default_value_t = default_worker_interval_ms())]
    #[serde(default = "default_worker_interval_ms")]
    /// Pause between worker passes, in milliseconds
    pub worker_interval_ms: u64,

    #[clap(long, action = clap::ArgAction::Set, default_value_t = default_index_retry_missing_credential())]
    #[serde(default = "default_index_retry_missing_credential")]
    /// When true, a missing credential envelope retries the job instead of
    /// degrading it to lexical-only indexing
    pub index_retry_missing_credential: bool,

    #[clap(long, default_value_t = default_credential_cache_prefix())]
    #[serde(default = "default_credential_cache_prefix")]
    pub credential_cache_prefix: String,

    #[clap(long, default_value_t = default_credential_cache_ttl_secs())]
    #[serde(default = "default_credential_cache_ttl_secs")]
    pub credential_cache_ttl_secs: u64,

    #[clap(long = "encryption-kek")]
    #[serde(default)]
    /// Key-encryption keys as repeated `id=secret` pairs; the largest id
    /// seals new envelopes
    pub encryption_keks: Vec<String>,

    #[clap(long, default_value_t = default_embedding_dimensions())]
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    #[clap(long, default_value_t = default_provider_endpoint())]
    #[serde(default = "default_provider_endpoint")]
    /// Embedding endpoint; empty disables semantic indexing and search
    pub embedder_url: String,

    #[clap(long, default_value_t = default_embedder_model())]
    #[serde(default = "default_embedder_model")]
    pub embedder_model: String,

    #[clap(long, default_value_t = default_provider_endpoint())]
    #[serde(default = "default_provider_endpoint")]
    /// Chunk contextualization endpoint; empty disables it
    pub contextualizer_url: String,

    #[clap(long, default_value_t = default_contextualizer_model())]
    #[serde(default = "default_contextualizer_model")]
    pub contextualizer_model: String,

    #[clap(long, default_value_t = default_provider_endpoint())]
    #[serde(default = "default_provider_endpoint")]
    /// Rerank endpoint; empty falls back to weighted fusion
    pub rerank_url: String,

    #[clap(long, default_value_t = default_rerank_model())]
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
}

impl Configuration {
    /// Directory where logs are written to
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse the `id=secret` pairs into the KEK map the envelope cipher
    /// takes. Secret strength is enforced by the cipher, not here.
    pub fn kek_map(&self) -> anyhow::Result<BTreeMap<u32, Vec<u8>>> {
        let mut keks = BTreeMap::new();
        for entry in &self.encryption_keks {
            let (id, secret) = entry
                .split_once('=')
                .context("encryption kek entries take the form id=secret")?;
            let id: u32 = id
                .trim()
                .parse()
                .with_context(|| format!("invalid kek id: {id}"))?;
            keks.insert(id, secret.as_bytes().to_vec());
        }
        Ok(keks)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            dsn: None,
            sql_max_connections: default_sql_max_connections(),
            max_payload_bytes: default_max_payload_bytes(),
            max_file_bytes: default_max_file_bytes(),
            max_project_bytes: default_max_project_bytes(),
            lock_timeout_ms: default_lock_timeout_ms(),
            delete_retention_days: default_delete_retention_days(),
            search_enabled: default_search_enabled(),
            search_limit_default: default_search_limit_default(),
            search_limit_max: default_search_limit_max(),
            list_limit_default: default_list_limit_default(),
            list_limit_max: default_list_limit_max(),
            vector_candidates: default_vector_candidates(),
            lexical_candidates: default_lexical_candidates(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            index_workers: default_index_workers(),
            index_batch_size: default_index_batch_size(),
            index_retry_max: default_index_retry_max(),
            index_retry_backoff_ms: default_index_retry_backoff_ms(),
            index_chunk_bytes: default_index_chunk_bytes(),
            index_freshness_slo_secs: default_index_freshness_slo_secs(),
            worker_interval_ms: default_worker_interval_ms(),
            index_retry_missing_credential: default_index_retry_missing_credential(),
            credential_cache_prefix: default_credential_cache_prefix(),
            credential_cache_ttl_secs: default_credential_cache_ttl_secs(),
            encryption_keks: Vec::new(),
            embedding_dimensions: default_embedding_dimensions(),
            embedder_url: default_provider_endpoint(),
            embedder_model: default_embedder_model(),
            contextualizer_url: default_provider_endpoint(),
            contextualizer_model: default_contextualizer_model(),
            rerank_url: default_provider_endpoint(),
            rerank_model: default_rerank_model(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    "fileio_data".into()
}

fn default_sql_max_connections() -> u32 {
    10
}

fn default_max_payload_bytes() -> u64 {
    2_000_000
}

fn default_max_file_bytes() -> u64 {
    10_000_000
}

fn default_max_project_bytes() -> u64 {
    100_000_000
}

fn default_lock_timeout_ms() -> u64 {
    3_000
}

fn default_delete_retention_days() -> u64 {
    30
}

fn default_search_enabled() -> bool {
    true
}

fn default_search_limit_default() -> i64 {
    5
}

fn default_search_limit_max() -> i64 {
    20
}

fn default_list_limit_default() -> i64 {
    100
}

fn default_list_limit_max() -> i64 {
    1_000
}

fn default_vector_candidates() -> i64 {
    30
}

fn default_lexical_candidates() -> i64 {
    30
}

fn default_semantic_weight() -> f64 {
    0.65
}

fn default_lexical_weight() -> f64 {
    0.35
}

fn default_rerank_timeout_ms() -> u64 {
    6_000
}

fn default_request_timeout_ms() -> u64 {
    8_000
}

fn default_index_workers() -> usize {
    2
}

fn default_index_batch_size() -> i64 {
    20
}

fn default_index_retry_max() -> i64 {
    5
}

fn default_index_retry_backoff_ms() -> u64 {
    1_000
}

fn default_index_chunk_bytes() -> usize {
    1_500
}

fn default_index_freshness_slo_secs() -> u64 {
    30
}

fn default_worker_interval_ms() -> u64 {
    500
}

fn default_index_retry_missing_credential() -> bool {
    false
}

fn default_credential_cache_prefix() -> String {
    "mcp:files:cred".to_owned()
}

fn default_credential_cache_ttl_secs() -> u64 {
    300
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_provider_endpoint() -> String {
    String::new()
}

fn default_embedder_model() -> String {
    "text-embedding-3-small".to_owned()
}

fn default_contextualizer_model() -> String {
    "gpt-4o-mini".to_owned()
}

fn default_rerank_model() -> String {
    "rerank-english-v3.0".to_owned()
}
