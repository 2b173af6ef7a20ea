//! Semantic candidate generation: nearest chunks to the query embedding by
//! cosine similarity. On Postgres with the vector extension the distance
//! runs in the database; everywhere else the stored vectors are scanned
//! in-process.

use sqlx::Row;

use crate::db::Db;

use super::types::Candidate;

pub(crate) struct SemanticEngine {
    sql: Db,
}

impl SemanticEngine {
    pub fn new(sql: Db) -> Self {
        Self { sql }
    }

    pub async fn candidates(
        &self,
        tenant_fp: &str,
        project: &str,
        path_prefix: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<Candidate>> {
        if query_vector.is_empty() {
            return Ok(Vec::new());
        }
        if self.sql.native_vectors() {
            self.nearest_native(tenant_fp, project, path_prefix, query_vector, limit)
                .await
        } else {
            self.nearest_scan(tenant_fp, project, path_prefix, query_vector, limit)
                .await
        }
    }

    async fn nearest_native(
        &self,
        tenant_fp: &str,
        project: &str,
        path_prefix: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<Candidate>> {
        let mut sql = String::from(
            r#"
            SELECT c.id, c.file_path, c.start_byte, c.end_byte, c.chunk_content,
                   CAST(1.0 - (e.embedding <=> $3::vector) AS DOUBLE PRECISION) AS score
            FROM mcp_file_chunk_embeddings e
            JOIN mcp_file_chunks c ON c.id = e.chunk_id
            JOIN mcp_files f
              ON f.tenant_fp = c.tenant_fp AND f.project = c.project
             AND f.path = c.file_path AND f.deleted = FALSE
            WHERE c.tenant_fp = $1 AND c.project = $2
            "#,
        );
        if !path_prefix.is_empty() {
            sql.push_str(r#" AND (c.file_path = $5 OR c.file_path LIKE $6 ESCAPE '\')"#);
        }
        sql.push_str(" ORDER BY e.embedding <=> $3::vector ASC LIMIT $4");

        let mut query = sqlx::query(&sql)
            .bind(tenant_fp)
            .bind(project)
            .bind(vector_literal(query_vector))
            .bind(limit as i64);
        if !path_prefix.is_empty() {
            query = query
                .bind(path_prefix)
                .bind(format!("{}/%", crate::files::store::escape_like(path_prefix)));
        }
        let rows = query.fetch_all(self.sql.pool()).await?;

        rows.into_iter()
            .map(|row| {
                let score: f64 = row.try_get("score")?;
                Ok(Candidate {
                    chunk_id: row.try_get("id")?,
                    file_path: row.try_get("file_path")?,
                    start_byte: row.try_get("start_byte")?,
                    end_byte: row.try_get("end_byte")?,
                    content: row.try_get("chunk_content")?,
                    score: score as f32,
                })
            })
            .collect()
    }

    async fn nearest_scan(
        &self,
        tenant_fp: &str,
        project: &str,
        path_prefix: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<Candidate>> {
        let mut sql = String::from(
            r#"
            SELECT c.id, c.file_path, c.start_byte, c.end_byte, c.chunk_content, e.embedding
            FROM mcp_file_chunk_embeddings e
            JOIN mcp_file_chunks c ON c.id = e.chunk_id
            JOIN mcp_files f
              ON f.tenant_fp = c.tenant_fp AND f.project = c.project
             AND f.path = c.file_path AND f.deleted = FALSE
            WHERE c.tenant_fp = $1 AND c.project = $2
            "#,
        );
        if !path_prefix.is_empty() {
            sql.push_str(r#" AND (c.file_path = $3 OR c.file_path LIKE $4 ESCAPE '\')"#);
        }
        let mut query = sqlx::query(&sql).bind(tenant_fp).bind(project);
        if !path_prefix.is_empty() {
            query = query
                .bind(path_prefix)
                .bind(format!("{}/%", crate::files::store::escape_like(path_prefix)));
        }
        let rows = query.fetch_all(self.sql.pool()).await?;

        let metric = floating_distance::Metric::Cosine;
        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let serialized: String = row.try_get("embedding")?;
            let stored: Vec<f32> = serde_json::from_str(&serialized)
                .map_err(|e| anyhow::anyhow!("malformed stored embedding: {e}"))?;
            if stored.len() != query_vector.len() {
                anyhow::bail!(
                    "stored embedding has {} dimensions, query has {}",
                    stored.len(),
                    query_vector.len()
                );
            }
            let score = metric.measure::<f32>(&stored, query_vector);
            scored.push(Candidate {
                chunk_id: row.try_get("id")?,
                file_path: row.try_get("file_path")?,
                start_byte: row.try_get("start_byte")?,
                end_byte: row.try_get("end_byte")?,
                content: row.try_get("chunk_content")?,
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Text form pgvector accepts for a `$n::vector` cast.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_form() {
        assert_eq!(vector_literal(&[]), "[]");
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
    }
}
