//! Hybrid retrieval. Candidates come from the lexical and semantic engines
//! independently; a failed engine degrades to an empty candidate set and
//! the other side still wins. Rerank is the primary scoring path when
//! configured, weighted fusion the fallback, and a whole-file scan covers
//! the window between a write committing and the worker indexing it.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::Row;
use tracing::{debug, warn};

use crate::application::config::configuration::Configuration;
use crate::db::{now_nanos, Db};
use crate::files::error::{ErrorCode, Result, ServiceError};
use crate::files::types::TenantAuth;
use crate::files::validate::{validate_path, validate_project};
use crate::llm::{Embedder, RerankClient};

use super::lexical::LexicalEngine;
use super::semantic::SemanticEngine;
use super::types::{Candidate, SearchChunk, SearchResponse};

pub struct SearchEngine {
    sql: Db,
    config: Arc<Configuration>,
    embedder: Option<Arc<dyn Embedder>>,
    rerank: Option<Arc<dyn RerankClient>>,
    lexical: LexicalEngine,
    semantic: SemanticEngine,
}

impl SearchEngine {
    pub fn new(
        sql: Db,
        config: Arc<Configuration>,
        embedder: Option<Arc<dyn Embedder>>,
        rerank: Option<Arc<dyn RerankClient>>,
    ) -> Self {
        Self {
            lexical: LexicalEngine::new(sql.clone()),
            semantic: SemanticEngine::new(sql.clone()),
            sql,
            config,
            embedder,
            rerank,
        }
    }

    pub async fn search(
        &self,
        auth: &TenantAuth,
        project: &str,
        query: &str,
        path_prefix: &str,
        limit: i64,
    ) -> Result<SearchResponse> {
        let project = validate_project(project)?;
        validate_path(path_prefix)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::invalid_query("query must not be empty"));
        }
        let limit = if limit <= 0 {
            self.config.search_limit_default
        } else {
            limit.min(self.config.search_limit_max)
        }
        .max(1) as usize;

        if !self.config.search_enabled {
            return Ok(SearchResponse::empty());
        }
        let fp = auth.fingerprint();

        let mut engine_failed = false;

        // both engines run together; either may fail without taking the
        // other one down with it
        let (lexical_result, semantic_result) = futures::join!(
            self.lexical.candidates(
                fp,
                &project,
                path_prefix,
                query,
                self.config.lexical_candidates as usize,
            ),
            self.semantic_candidates(auth, &project, path_prefix, query)
        );
        let lexical = match lexical_result {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(?error, project, "lexical candidate generation failed");
                engine_failed = true;
                Vec::new()
            }
        };
        let semantic = match semantic_result {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(?error, project, "semantic candidate generation failed");
                engine_failed = true;
                Vec::new()
            }
        };

        if lexical.is_empty() && semantic.is_empty() {
            let fallback = self
                .pre_index_fallback(fp, &project, path_prefix, query, limit)
                .await?;
            if !fallback.is_empty() {
                return Ok(SearchResponse {
                    chunks: fallback,
                    is_full_file: true,
                });
            }
            if engine_failed {
                return Err(ServiceError::new(
                    ErrorCode::SearchBackendError,
                    "search backends unavailable",
                ));
            }
            return Ok(SearchResponse::empty());
        }

        let mut fused = fuse(
            &lexical,
            &semantic,
            self.config.lexical_weight,
            self.config.semantic_weight,
        );

        if let Some(rerank) = &self.rerank {
            if !auth.api_key().is_empty() {
                let documents: Vec<String> =
                    fused.iter().map(|candidate| candidate.content.clone()).collect();
                match rerank.rerank(auth.api_key(), query, &documents).await {
                    Ok(scores) => {
                        // input order preserved, scores map one-to-one
                        for (candidate, score) in fused.iter_mut().zip(scores) {
                            candidate.score = score;
                        }
                    }
                    Err(error) => {
                        debug!(?error, "rerank unavailable, keeping fused scores");
                    }
                }
            }
        }

        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        fused.truncate(limit);

        self.stamp_last_served(&fused).await?;

        Ok(SearchResponse {
            chunks: fused
                .into_iter()
                .map(|candidate| SearchChunk {
                    file_path: candidate.file_path,
                    start_byte: candidate.start_byte,
                    end_byte: candidate.end_byte,
                    content: candidate.content,
                    score: candidate.score,
                })
                .collect(),
            is_full_file: false,
        })
    }

    async fn semantic_candidates(
        &self,
        auth: &TenantAuth,
        project: &str,
        path_prefix: &str,
        query: &str,
    ) -> anyhow::Result<Vec<Candidate>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        if auth.api_key().is_empty() {
            anyhow::bail!("no api key for query embedding");
        }
        let vectors = embedder
            .embed_texts(auth.api_key(), &[query.to_owned()])
            .await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for the query"))?;
        self.semantic
            .candidates(
                auth.fingerprint(),
                project,
                path_prefix,
                &query_vector,
                self.config.vector_candidates as usize,
            )
            .await
    }

    /// Newly written files are searchable before the worker runs: prefix +
    /// case-insensitive substring match over active file contents.
    async fn pre_index_fallback(
        &self,
        tenant_fp: &str,
        project: &str,
        path_prefix: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchChunk>> {
        let mut sql = String::from(
            r#"
            SELECT path, content, size FROM mcp_files
            WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
            "#,
        );
        if !path_prefix.is_empty() {
            sql.push_str(r#" AND (path = $3 OR path LIKE $4 ESCAPE '\')"#);
        }
        sql.push_str(" ORDER BY path ASC");

        let mut rows_query = sqlx::query(&sql).bind(tenant_fp).bind(project);
        if !path_prefix.is_empty() {
            rows_query = rows_query
                .bind(path_prefix)
                .bind(format!("{}/%", crate::files::store::escape_like(path_prefix)));
        }
        let rows = rows_query.fetch_all(self.sql.pool()).await?;

        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for row in rows {
            let path: String = row.try_get("path")?;
            let content: Vec<u8> = row.try_get("content")?;
            let size: i64 = row.try_get("size")?;
            let text = String::from_utf8_lossy(&content);
            if text.to_lowercase().contains(&needle) {
                hits.push(SearchChunk {
                    file_path: path,
                    start_byte: 0,
                    end_byte: size,
                    content: text.into_owned(),
                    score: 0.0,
                });
                if hits.len() == limit {
                    break;
                }
            }
        }
        Ok(hits)
    }

    /// Only the chunks actually handed back get their freshness stamped.
    async fn stamp_last_served(&self, served: &[Candidate]) -> Result<()> {
        if served.is_empty() {
            return Ok(());
        }
        let id_list = served
            .iter()
            .map(|candidate| candidate.chunk_id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "UPDATE mcp_file_chunks SET last_served_at = $1 WHERE id IN ({id_list})"
        ))
        .bind(now_nanos())
        .execute(self.sql.pool())
        .await?;
        Ok(())
    }
}

/// Weighted-sum fusion over min-max-normalized per-engine scores. A chunk
/// absent from one engine contributes zero on that side. Returns the union
/// in a stable order (fused score descending, chunk id ascending) so the
/// rerank request sees a deterministic document list.
fn fuse(
    lexical: &[Candidate],
    semantic: &[Candidate],
    lexical_weight: f64,
    semantic_weight: f64,
) -> Vec<Candidate> {
    let weight_sum = lexical_weight + semantic_weight;
    let (lexical_weight, semantic_weight) = if weight_sum > 0.0 {
        (
            (lexical_weight / weight_sum) as f32,
            (semantic_weight / weight_sum) as f32,
        )
    } else {
        (0.5, 0.5)
    };

    let lexical_norm = normalize(lexical);
    let semantic_norm = normalize(semantic);

    let mut union: HashMap<i64, Candidate> = HashMap::new();
    for (candidate, norm) in lexical.iter().zip(&lexical_norm) {
        let mut fused = candidate.clone();
        fused.score = lexical_weight * norm;
        union.insert(fused.chunk_id, fused);
    }
    for (candidate, norm) in semantic.iter().zip(&semantic_norm) {
        match union.get_mut(&candidate.chunk_id) {
            Some(existing) => existing.score += semantic_weight * norm,
            None => {
                let mut fused = candidate.clone();
                fused.score = semantic_weight * norm;
                union.insert(fused.chunk_id, fused);
            }
        }
    }

    let mut fused: Vec<Candidate> = union.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}

fn normalize(candidates: &[Candidate]) -> Vec<f32> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let min = candidates.iter().map(|c| c.score).fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        // a flat engine still voted for these candidates
        return vec![1.0; candidates.len()];
    }
    candidates
        .iter()
        .map(|c| (c.score - min) / (max - min))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(chunk_id: i64, score: f32) -> Candidate {
        Candidate {
            chunk_id,
            file_path: format!("/f{chunk_id}.txt"),
            start_byte: 0,
            end_byte: 10,
            content: "text".to_owned(),
            score,
        }
    }

    #[test]
    fn fusion_prefers_agreement() {
        let lexical = vec![candidate(1, 2.0), candidate(2, 1.0)];
        let semantic = vec![candidate(2, 0.9), candidate(3, 0.8)];
        let fused = fuse(&lexical, &semantic, 0.35, 0.65);
        // chunk 2 scored on both sides and should come out on top
        assert_eq!(fused[0].chunk_id, 2);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn weights_renormalize() {
        let lexical = vec![candidate(1, 1.0)];
        let semantic = vec![candidate(2, 1.0)];
        // weights that do not sum to 1 still split the unit interval
        let fused = fuse(&lexical, &semantic, 2.0, 2.0);
        assert!((fused[0].score - 0.5).abs() < 1e-6);
        assert!((fused[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_engine_results_survive_fusion() {
        let lexical = vec![candidate(1, 5.0), candidate(2, 1.0)];
        let fused = fuse(&lexical, &[], 0.35, 0.65);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].chunk_id, 1);
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn flat_scores_normalize_to_one() {
        let lexical = vec![candidate(1, 3.0), candidate(2, 3.0)];
        let norms = normalize(&lexical);
        assert_eq!(norms, vec![1.0, 1.0]);
    }
}
