//! Startup schema migration. DDL is dialect-specific but the column sets
//! are identical; query code never needs to know which dialect it is on
//! beyond the capabilities recorded on `SqlDb`.

use anyhow::{Context, Result};
use sqlx::AnyPool;
use tracing::debug;

use super::Dialect;

/// Create all tables and indexes if they are missing. Returns whether the
/// embeddings column is a native vector type.
pub async fn ensure_schema(pool: &AnyPool, dialect: Dialect, dims: u32) -> Result<bool> {
    let native_vectors = match dialect {
        Dialect::Postgres => install_vector_extension(pool).await,
        Dialect::Sqlite => false,
    };
    let statements = match dialect {
        Dialect::Postgres => postgres_ddl(dims, native_vectors),
        Dialect::Sqlite => sqlite_ddl(),
    };
    for statement in statements {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .with_context(|| format!("running migration: {statement}"))?;
    }
    debug!(?dialect, native_vectors, "schema ensured");
    Ok(native_vectors)
}

// the extension was renamed upstream; accept both spellings
async fn install_vector_extension(pool: &AnyPool) -> bool {
    for name in ["vector", "pgvector"] {
        let result = sqlx::query(&format!("CREATE EXTENSION IF NOT EXISTS {name}"))
            .execute(pool)
            .await;
        if result.is_ok() {
            return true;
        }
    }
    false
}

fn postgres_ddl(dims: u32, native_vectors: bool) -> Vec<String> {
    let embedding_column = if native_vectors {
        format!("embedding vector({dims})")
    } else {
        "embedding TEXT".to_owned()
    };
    vec![
        r#"
        CREATE TABLE IF NOT EXISTS mcp_files (
            id BIGSERIAL PRIMARY KEY,
            tenant_fp TEXT NOT NULL,
            project TEXT NOT NULL,
            path TEXT NOT NULL,
            content BYTEA NOT NULL,
            size BIGINT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            deleted BOOLEAN NOT NULL DEFAULT FALSE,
            deleted_at BIGINT
        )
        "#
        .to_owned(),
        // one active row per path; soft-deleted rows can pile up behind it
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_mcp_files_active_path
            ON mcp_files (tenant_fp, project, path) WHERE deleted = FALSE
        "#
        .to_owned(),
        r#"
        CREATE INDEX IF NOT EXISTS idx_mcp_files_prefix
            ON mcp_files (tenant_fp, project, path text_pattern_ops)
        "#
        .to_owned(),
        r#"
        CREATE INDEX IF NOT EXISTS idx_mcp_files_deleted_at
            ON mcp_files (deleted_at)
        "#
        .to_owned(),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_chunks (
            id BIGSERIAL PRIMARY KEY,
            tenant_fp TEXT NOT NULL,
            project TEXT NOT NULL,
            file_path TEXT NOT NULL,
            chunk_index BIGINT NOT NULL,
            start_byte BIGINT NOT NULL,
            end_byte BIGINT NOT NULL,
            chunk_content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            last_served_at BIGINT,
            UNIQUE (tenant_fp, project, file_path, chunk_index)
        )
        "#
        .to_owned(),
        format!(
            r#"
        CREATE TABLE IF NOT EXISTS mcp_file_chunk_embeddings (
            chunk_id BIGINT PRIMARY KEY,
            {embedding_column},
            model TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )
        "#
        ),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_chunk_bm25 (
            chunk_id BIGINT PRIMARY KEY,
            tokens TEXT NOT NULL,
            token_count BIGINT NOT NULL,
            tokenizer TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )
        "#
        .to_owned(),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_index_jobs (
            id BIGSERIAL PRIMARY KEY,
            tenant_fp TEXT NOT NULL,
            project TEXT NOT NULL,
            file_path TEXT NOT NULL,
            operation TEXT NOT NULL,
            file_updated_at BIGINT,
            status TEXT NOT NULL,
            retry_count BIGINT NOT NULL DEFAULT 0,
            available_at BIGINT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )
        "#
        .to_owned(),
        r#"
        CREATE INDEX IF NOT EXISTS idx_mcp_file_index_jobs_claim
            ON mcp_file_index_jobs (status, available_at, id)
        "#
        .to_owned(),
    ]
}

fn sqlite_ddl() -> Vec<String> {
    vec![
        r#"
        CREATE TABLE IF NOT EXISTS mcp_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_fp TEXT NOT NULL,
            project TEXT NOT NULL,
            path TEXT NOT NULL,
            content BLOB NOT NULL,
            size INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at INTEGER
        )
        "#
        .to_owned(),
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_mcp_files_active_path
            ON mcp_files (tenant_fp, project, path) WHERE deleted = 0
        "#
        .to_owned(),
        r#"
        CREATE INDEX IF NOT EXISTS idx_mcp_files_prefix
            ON mcp_files (tenant_fp, project, path)
        "#
        .to_owned(),
        r#"
        CREATE INDEX IF NOT EXISTS idx_mcp_files_deleted_at
            ON mcp_files (deleted_at)
        "#
        .to_owned(),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_fp TEXT NOT NULL,
            project TEXT NOT NULL,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            chunk_content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_served_at INTEGER,
            UNIQUE (tenant_fp, project, file_path, chunk_index)
        )
        "#
        .to_owned(),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_chunk_embeddings (
            chunk_id INTEGER PRIMARY KEY,
            embedding TEXT NOT NULL,
            model TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#
        .to_owned(),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_chunk_bm25 (
            chunk_id INTEGER PRIMARY KEY,
            tokens TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            tokenizer TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#
        .to_owned(),
        r#"
        CREATE TABLE IF NOT EXISTS mcp_file_index_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_fp TEXT NOT NULL,
            project TEXT NOT NULL,
            file_path TEXT NOT NULL,
            operation TEXT NOT NULL,
            file_updated_at INTEGER,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            available_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#
        .to_owned(),
        r#"
        CREATE INDEX IF NOT EXISTS idx_mcp_file_index_jobs_claim
            ON mcp_file_index_jobs (status, available_at, id)
        "#
        .to_owned(),
    ]
}
