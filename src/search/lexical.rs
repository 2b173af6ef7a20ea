//! Lexical candidate generation: BM25 over the stored token-frequency
//! maps. The scorer runs in-process on both dialects so ranking is
//! identical wherever the rows live. Corpus statistics (document
//! frequencies, average length) are computed over the filtered scope, not
//! the whole table, which is what a per-project index would see anyway.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::Row;

use crate::db::Db;

use super::types::Candidate;

pub const TOKENIZER_NAME: &str = "simple-lower-v1";

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9_]+").expect("token pattern compiles"));

pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|token| token.as_str().to_owned())
        .collect()
}

/// Token frequency map plus total token count, the stored posting form.
pub fn token_frequencies(text: &str) -> (HashMap<String, i64>, i64) {
    let tokens = tokenize(text);
    let total = tokens.len() as i64;
    let mut frequencies = HashMap::new();
    for token in tokens {
        *frequencies.entry(token).or_insert(0) += 1;
    }
    (frequencies, total)
}

struct Posting {
    chunk_id: i64,
    file_path: String,
    start_byte: i64,
    end_byte: i64,
    content: String,
    tokens: HashMap<String, i64>,
    token_count: i64,
}

pub(crate) struct LexicalEngine {
    sql: Db,
}

impl LexicalEngine {
    pub fn new(sql: Db) -> Self {
        Self { sql }
    }

    pub async fn candidates(
        &self,
        tenant_fp: &str,
        project: &str,
        path_prefix: &str,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candidate>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let postings = self.load_postings(tenant_fp, project, path_prefix).await?;
        if postings.is_empty() {
            return Ok(Vec::new());
        }

        let corpus_size = postings.len() as f32;
        let avg_len = postings.iter().map(|p| p.token_count as f32).sum::<f32>() / corpus_size;
        let mut document_frequency: HashMap<&str, f32> = HashMap::new();
        for token in &query_tokens {
            let df = postings
                .iter()
                .filter(|p| p.tokens.contains_key(token))
                .count() as f32;
            document_frequency.insert(token.as_str(), df);
        }

        let mut scored: Vec<Candidate> = postings
            .iter()
            .filter_map(|posting| {
                let mut score = 0.0_f32;
                for token in &query_tokens {
                    let tf = *posting.tokens.get(token).unwrap_or(&0) as f32;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = document_frequency[token.as_str()];
                    let idf = ((corpus_size - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let doc_len = posting.token_count as f32;
                    let norm = tf * (BM25_K1 + 1.0)
                        / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len.max(1.0)));
                    score += idf * norm;
                }
                (score > 0.0).then(|| Candidate {
                    chunk_id: posting.chunk_id,
                    file_path: posting.file_path.clone(),
                    start_byte: posting.start_byte,
                    end_byte: posting.end_byte,
                    content: posting.content.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn load_postings(
        &self,
        tenant_fp: &str,
        project: &str,
        path_prefix: &str,
    ) -> anyhow::Result<Vec<Posting>> {
        let mut sql = String::from(
            r#"
            SELECT c.id, c.file_path, c.start_byte, c.end_byte, c.chunk_content,
                   b.tokens, b.token_count
            FROM mcp_file_chunk_bm25 b
            JOIN mcp_file_chunks c ON c.id = b.chunk_id
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

        rows.into_iter()
            .map(|row| {
                let tokens_json: String = row.try_get("tokens")?;
                let tokens: HashMap<String, i64> = serde_json::from_str(&tokens_json)
                    .map_err(|e| anyhow::anyhow!("malformed stored token map: {e}"))?;
                Ok(Posting {
                    chunk_id: row.try_get("id")?,
                    file_path: row.try_get("file_path")?,
                    start_byte: row.try_get("start_byte")?,
                    end_byte: row.try_get("end_byte")?,
                    content: row.try_get("chunk_content")?,
                    tokens,
                    token_count: row.try_get("token_count")?,
                })
            })
            .collect()
    }
}
