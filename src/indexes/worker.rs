//! Background index worker. Claims pending jobs, rebuilds the derived
//! chunk/embedding/BM25 rows for each affected path, and retires the
//! credential envelope that financed the provider calls. Failures are
//! per-job: one bad file never stalls the queue.

use std::sync::Arc;
use std::time::Duration;

use rand::{distributions, thread_rng, Rng};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::config::configuration::Configuration;
use crate::chunking::text_chunker::TextChunker;
use crate::db::{now_nanos, Db};
use crate::files::store::load_active_file;
use crate::llm::{Contextualizer, Embedder};
use crate::search::lexical::{token_frequencies, TOKENIZER_NAME};
use crate::search::semantic::vector_literal;
use crate::security::credential_store::{credential_aad, credential_cache_key, CredentialStore};
use crate::security::envelope::EnvelopeCipher;

use super::queue::{self, IndexJob, JobOperation};

enum JobError {
    /// Worth another attempt after backoff.
    Transient(anyhow::Error),
    /// Never going to succeed; fail the job now.
    Terminal(String),
}

pub struct IndexWorker {
    sql: Db,
    config: Arc<Configuration>,
    credentials: Arc<dyn CredentialStore>,
    cipher: Option<Arc<EnvelopeCipher>>,
    embedder: Option<Arc<dyn Embedder>>,
    contextualizer: Option<Arc<dyn Contextualizer>>,
    chunker: TextChunker,
}

impl IndexWorker {
    pub fn new(
        sql: Db,
        config: Arc<Configuration>,
        credentials: Arc<dyn CredentialStore>,
        cipher: Option<Arc<EnvelopeCipher>>,
        embedder: Option<Arc<dyn Embedder>>,
        contextualizer: Option<Arc<dyn Contextualizer>>,
    ) -> Self {
        let chunker = TextChunker::new(config.index_chunk_bytes);
        Self {
            sql,
            config,
            credentials,
            cipher,
            embedder,
            contextualizer,
            chunker,
        }
    }

    /// Worker loop: one claim-and-process pass per interval until shutdown
    /// flips. A pass interrupted by shutdown stops cleanly; its claimed
    /// jobs come back via retry once their processing state goes stale.
    pub async fn run(self: Arc<Self>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "index worker started");
        let interval = Duration::from_millis(self.config.worker_interval_ms);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.run_once() => {
                    if let Err(error) = result {
                        error!(worker_id, ?error, "index pass failed");
                    }
                }
            }
            // small random jitter so a worker pool does not hammer the
            // claim query in lockstep
            let jitter = thread_rng().sample(distributions::Uniform::new(
                0,
                self.config.worker_interval_ms / 4 + 1,
            ));
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval + Duration::from_millis(jitter)) => {}
            }
        }
        info!(worker_id, "index worker stopped");
    }

    /// Claim one batch and process it. Returns how many jobs were handled.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let jobs = queue::claim_batch(&self.sql, now_nanos(), self.config.index_batch_size).await?;
        let claimed = jobs.len();
        for job in jobs {
            match self.process(&job).await {
                Ok(()) => {
                    queue::mark_done(&self.sql, job.id, now_nanos()).await?;
                }
                Err(JobError::Terminal(reason)) => {
                    error!(job_id = job.id, path = %job.file_path, reason, "index job failed terminally");
                    queue::mark_failed(&self.sql, job.id, now_nanos()).await?;
                }
                Err(JobError::Transient(cause)) => {
                    if job.retry_count < self.config.index_retry_max {
                        let backoff = self.config.index_retry_backoff_ms as i64
                            * 1_000_000
                            * (job.retry_count + 1);
                        warn!(
                            job_id = job.id,
                            path = %job.file_path,
                            retry = job.retry_count + 1,
                            ?cause,
                            "index job rescheduled"
                        );
                        queue::reschedule(&self.sql, job.id, now_nanos() + backoff, now_nanos())
                            .await?;
                    } else {
                        error!(job_id = job.id, path = %job.file_path, ?cause, "index job out of retries");
                        queue::mark_failed(&self.sql, job.id, now_nanos()).await?;
                    }
                }
            }
        }
        Ok(claimed)
    }

    async fn process(&self, job: &IndexJob) -> Result<(), JobError> {
        match JobOperation::parse(&job.operation) {
            Some(JobOperation::Upsert) => self.process_upsert(job).await,
            Some(JobOperation::Delete) => self.process_delete(job).await,
            None => Err(JobError::Terminal(format!(
                "unknown operation {}",
                job.operation
            ))),
        }
    }

    async fn process_upsert(&self, job: &IndexJob) -> Result<(), JobError> {
        let file = load_active_file(
            self.sql.pool(),
            &job.tenant_fp,
            &job.project,
            &job.file_path,
        )
        .await
        .map_err(|e| JobError::Transient(e.into()))?;

        let Some(file) = file else {
            // deleted (or renamed away) after enqueue; drop the leftovers
            return self.delete_derived_rows(job).await;
        };
        if let Some(snapshot) = job.file_updated_at {
            if file.updated_at > snapshot {
                // a newer write enqueued a newer job; this one is obsolete
                debug!(job_id = job.id, path = %job.file_path, "stale upsert skipped");
                return Ok(());
            }
        }

        let text = String::from_utf8_lossy(&file.content).into_owned();
        let chunks = self.chunker.split(&text);

        let api_key = self.load_credential(job).await;
        if api_key.is_none()
            && self.embedder.is_some()
            && self.config.index_retry_missing_credential
        {
            return Err(JobError::Transient(anyhow::anyhow!(
                "credential envelope unavailable"
            )));
        }

        // contextualization is best-effort: any failure falls back to the
        // raw chunk text rather than blocking the job
        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let index_contents: Vec<String> = match (&self.contextualizer, &api_key) {
            (Some(contextualizer), Some(key)) if !chunks.is_empty() => {
                match contextualizer.chunk_contexts(key, &text, &chunk_texts).await {
                    Ok(contexts) if contexts.len() == chunk_texts.len() => chunk_texts
                        .iter()
                        .zip(&contexts)
                        .map(|(chunk, context)| {
                            if context.is_empty() {
                                chunk.clone()
                            } else {
                                format!("{context}\n\n{chunk}")
                            }
                        })
                        .collect(),
                    Ok(_) => {
                        warn!(job_id = job.id, "contextualizer count mismatch, using raw chunks");
                        chunk_texts.clone()
                    }
                    Err(error) => {
                        warn!(job_id = job.id, ?error, "contextualizer failed, using raw chunks");
                        chunk_texts.clone()
                    }
                }
            }
            _ => chunk_texts.clone(),
        };

        let vectors = match (&self.embedder, &api_key) {
            (Some(embedder), Some(key)) if !chunks.is_empty() => {
                let vectors = embedder
                    .embed_texts(key, &index_contents)
                    .await
                    .map_err(|e| JobError::Transient(e.into()))?;
                if vectors.len() != chunks.len() {
                    return Err(JobError::Transient(anyhow::anyhow!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        chunks.len()
                    )));
                }
                Some(vectors)
            }
            _ => None,
        };

        let now = now_nanos();
        let mut tx = self
            .sql
            .pool()
            .begin()
            .await
            .map_err(|e| JobError::Transient(e.into()))?;
        clear_derived_rows(&mut tx, &job.tenant_fp, &job.project, &job.file_path)
            .await
            .map_err(|e| JobError::Transient(e.into()))?;

        for chunk in &chunks {
            let chunk_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO mcp_file_chunks
                    (tenant_fp, project, file_path, chunk_index, start_byte, end_byte,
                     chunk_content, content_hash, created_at, updated_at, last_served_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, NULL)
                RETURNING id
                "#,
            )
            .bind(&job.tenant_fp)
            .bind(&job.project)
            .bind(&job.file_path)
            .bind(chunk.index as i64)
            .bind(chunk.start_byte as i64)
            .bind(chunk.end_byte as i64)
            .bind(&chunk.content)
            .bind(blake3::hash(chunk.content.as_bytes()).to_hex().to_string())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| JobError::Transient(e.into()))?;

            let (frequencies, token_count) = token_frequencies(&chunk.content);
            let tokens_json = serde_json::to_string(&frequencies)
                .map_err(|e| JobError::Transient(e.into()))?;
            sqlx::query(
                r#"
                INSERT INTO mcp_file_chunk_bm25
                    (chunk_id, tokens, token_count, tokenizer, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                "#,
            )
            .bind(chunk_id)
            .bind(tokens_json)
            .bind(token_count)
            .bind(TOKENIZER_NAME)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| JobError::Transient(e.into()))?;

            if let (Some(vectors), Some(embedder)) = (&vectors, &self.embedder) {
                let vector = &vectors[chunk.index];
                let insert = if self.sql.native_vectors() {
                    r#"
                    INSERT INTO mcp_file_chunk_embeddings
                        (chunk_id, embedding, model, created_at, updated_at)
                    VALUES ($1, $2::vector, $3, $4, $4)
                    "#
                } else {
                    r#"
                    INSERT INTO mcp_file_chunk_embeddings
                        (chunk_id, embedding, model, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $4)
                    "#
                };
                let serialized = if self.sql.native_vectors() {
                    vector_literal(vector)
                } else {
                    serde_json::to_string(vector).map_err(|e| JobError::Transient(e.into()))?
                };
                sqlx::query(insert)
                    .bind(chunk_id)
                    .bind(serialized)
                    .bind(embedder.model())
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| JobError::Transient(e.into()))?;
            }
        }

        tx.commit().await.map_err(|e| JobError::Transient(e.into()))?;
        debug!(
            job_id = job.id,
            path = %job.file_path,
            chunks = chunks.len(),
            semantic = vectors.is_some(),
            "upsert indexed"
        );

        self.discard_credential(job).await;
        Ok(())
    }

    async fn process_delete(&self, job: &IndexJob) -> Result<(), JobError> {
        let file = load_active_file(
            self.sql.pool(),
            &job.tenant_fp,
            &job.project,
            &job.file_path,
        )
        .await
        .map_err(|e| JobError::Transient(e.into()))?;
        if let (Some(file), Some(snapshot)) = (&file, job.file_updated_at) {
            if file.updated_at > snapshot {
                // the path was rewritten after this delete was enqueued
                debug!(job_id = job.id, path = %job.file_path, "stale delete skipped");
                return Ok(());
            }
        }
        self.delete_derived_rows(job).await?;
        self.discard_credential(job).await;
        Ok(())
    }

    async fn delete_derived_rows(&self, job: &IndexJob) -> Result<(), JobError> {
        let mut tx = self
            .sql
            .pool()
            .begin()
            .await
            .map_err(|e| JobError::Transient(e.into()))?;
        clear_derived_rows(&mut tx, &job.tenant_fp, &job.project, &job.file_path)
            .await
            .map_err(|e| JobError::Transient(e.into()))?;
        tx.commit().await.map_err(|e| JobError::Transient(e.into()))?;
        debug!(job_id = job.id, path = %job.file_path, "derived rows removed");
        Ok(())
    }

    /// Load and open the credential envelope for this job. Every miss is a
    /// degradation to lexical-only indexing, not an error.
    async fn load_credential(&self, job: &IndexJob) -> Option<String> {
        let snapshot = job.file_updated_at?;
        let cipher = self.cipher.as_ref()?;
        let key = credential_cache_key(
            &self.config.credential_cache_prefix,
            &job.tenant_fp,
            &job.project,
            &job.file_path,
            snapshot,
        );
        let payload = match self.credentials.load(&key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(job_id = job.id, "no credential envelope, indexing lexical-only");
                return None;
            }
            Err(error) => {
                warn!(job_id = job.id, ?error, "credential store unavailable");
                return None;
            }
        };
        let aad = credential_aad(&job.tenant_fp, &job.project, &job.file_path, snapshot);
        match cipher.decrypt(&payload, &aad) {
            Ok(api_key) => Some(api_key),
            Err(error) => {
                // never log payload or plaintext here
                warn!(job_id = job.id, ?error, "credential envelope failed to open");
                None
            }
        }
    }

    /// Envelope deletion after use is best-effort; TTL cleans up stragglers.
    async fn discard_credential(&self, job: &IndexJob) {
        let Some(snapshot) = job.file_updated_at else {
            return;
        };
        let key = credential_cache_key(
            &self.config.credential_cache_prefix,
            &job.tenant_fp,
            &job.project,
            &job.file_path,
            snapshot,
        );
        if let Err(error) = self.credentials.delete(&key).await {
            warn!(job_id = job.id, ?error, "failed to delete credential envelope");
        }
    }
}

async fn clear_derived_rows(
    tx: &mut sqlx::Transaction<'static, sqlx::Any>,
    tenant_fp: &str,
    project: &str,
    file_path: &str,
) -> sqlx::Result<()> {
    for table in ["mcp_file_chunk_embeddings", "mcp_file_chunk_bm25"] {
        sqlx::query(&format!(
            r#"
            DELETE FROM {table} WHERE chunk_id IN (
                SELECT id FROM mcp_file_chunks
                WHERE tenant_fp = $1 AND project = $2 AND file_path = $3
            )
            "#
        ))
        .bind(tenant_fp)
        .bind(project)
        .bind(file_path)
        .execute(&mut **tx)
        .await?;
    }
    sqlx::query(
        "DELETE FROM mcp_file_chunks WHERE tenant_fp = $1 AND project = $2 AND file_path = $3",
    )
    .bind(tenant_fp)
    .bind(project)
    .bind(file_path)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
