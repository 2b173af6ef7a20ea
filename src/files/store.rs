//! The virtual filesystem. Files are rows; directories are synthesized
//! from the active-path prefix set and never stored. All mutations run
//! under the project lock and enqueue their index jobs inside the same
//! transaction; readers go straight to the pool.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sqlx::{Any, AnyConnection, Executor, Row};
use tracing::{debug, warn};

use crate::db::{now_nanos, Db};
use crate::llm::{Embedder, RerankClient};
use crate::search::engine::SearchEngine;
use crate::search::types::SearchResponse;
use crate::security::credential_store::{credential_aad, credential_cache_key, CredentialStore};
use crate::security::envelope::EnvelopeCipher;
use crate::application::config::configuration::Configuration;
use crate::indexes::queue::{self, JobOperation};

use super::error::{ErrorCode, Result, ServiceError};
use super::lock::ProjectLocks;
use super::types::{
    DeleteResult, EntryType, ListEntry, ListResult, ReadResult, RenameResult, StatResult,
    TenantAuth, WriteMode, WriteResult,
};
use super::validate::{
    ancestor_paths, validate_encoding, validate_path, validate_payload_size, validate_project,
};

pub struct FileService {
    sql: Db,
    config: Arc<Configuration>,
    locks: ProjectLocks,
    credentials: Arc<dyn CredentialStore>,
    cipher: Option<Arc<EnvelopeCipher>>,
    search: SearchEngine,
}

impl FileService {
    pub fn new(
        sql: Db,
        config: Arc<Configuration>,
        credentials: Arc<dyn CredentialStore>,
        cipher: Option<Arc<EnvelopeCipher>>,
        embedder: Option<Arc<dyn Embedder>>,
        rerank: Option<Arc<dyn RerankClient>>,
    ) -> Self {
        let search = SearchEngine::new(sql.clone(), config.clone(), embedder, rerank);
        Self {
            sql,
            config,
            locks: ProjectLocks::new(),
            credentials,
            cipher,
            search,
        }
    }

    pub async fn stat(&self, auth: &TenantAuth, project: &str, path: &str) -> Result<StatResult> {
        let project = validate_project(project)?;
        validate_path(path)?;
        let fp = auth.fingerprint();

        if path.is_empty() {
            // the root is always a directory, even in an empty project
            let updated = max_updated_at(self.sql.pool(), fp, &project, "").await?;
            return Ok(StatResult {
                exists: true,
                entry_type: Some(EntryType::Directory),
                size: 0,
                created_at: 0,
                updated_at: updated,
            });
        }

        if let Some(file) = load_active_file(self.sql.pool(), fp, &project, path).await? {
            return Ok(StatResult {
                exists: true,
                entry_type: Some(EntryType::File),
                size: file.size,
                created_at: file.created_at,
                updated_at: file.updated_at,
            });
        }

        if count_descendants(self.sql.pool(), fp, &project, path).await? > 0 {
            let updated = max_updated_at(self.sql.pool(), fp, &project, path).await?;
            return Ok(StatResult {
                exists: true,
                entry_type: Some(EntryType::Directory),
                size: 0,
                created_at: 0,
                updated_at: updated,
            });
        }

        Ok(StatResult::missing())
    }

    pub async fn read(
        &self,
        auth: &TenantAuth,
        project: &str,
        path: &str,
        offset: i64,
        length: i64,
    ) -> Result<ReadResult> {
        let project = validate_project(project)?;
        validate_path(path)?;
        if offset < 0 {
            return Err(ServiceError::invalid_offset("offset must be non-negative"));
        }
        if length < -1 {
            return Err(ServiceError::invalid_offset(
                "length must be -1 or non-negative",
            ));
        }
        if path.is_empty() {
            return Err(ServiceError::new(ErrorCode::IsDirectory, "cannot read a directory"));
        }
        let fp = auth.fingerprint();

        let Some(file) = load_active_file(self.sql.pool(), fp, &project, path).await? else {
            if count_descendants(self.sql.pool(), fp, &project, path).await? > 0 {
                return Err(ServiceError::new(
                    ErrorCode::IsDirectory,
                    "cannot read a directory",
                ));
            }
            return Err(ServiceError::not_found("no file at path"));
        };

        let content = slice_content(&file.content, offset, length);
        Ok(ReadResult {
            content,
            content_encoding: "utf-8".to_owned(),
        })
    }

    pub async fn write(
        &self,
        auth: &TenantAuth,
        project: &str,
        path: &str,
        content: &[u8],
        content_encoding: &str,
        offset: i64,
        mode: WriteMode,
    ) -> Result<WriteResult> {
        let project = validate_project(project)?;
        validate_path(path)?;
        validate_encoding(content_encoding)?;
        validate_payload_size(content.len(), self.config.max_payload_bytes)?;
        if path.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::IsDirectory,
                "cannot write to a directory",
            ));
        }
        if offset < 0 {
            return Err(ServiceError::invalid_offset("offset must be non-negative"));
        }
        if mode == WriteMode::Truncate && offset != 0 {
            return Err(ServiceError::invalid_offset(
                "truncate writes must start at offset 0",
            ));
        }
        let fp = auth.fingerprint();

        let mut locked = self
            .locks
            .acquire(&self.sql, fp, &project, self.config.lock_timeout())
            .await?;
        let now = now_nanos();

        if count_descendants(&mut *locked.conn(), fp, &project, path).await? > 0 {
            return Err(ServiceError::new(
                ErrorCode::IsDirectory,
                "path is a directory",
            ));
        }
        let ancestors = ancestor_paths(path);
        if any_active_file_in(&mut *locked.conn(), fp, &project, &ancestors).await? {
            return Err(ServiceError::new(
                ErrorCode::NotDirectory,
                "an ancestor of path is a file",
            ));
        }

        let existing = load_active_file(&mut *locked.conn(), fp, &project, path).await?;
        let existing_size = existing.as_ref().map(|f| f.size).unwrap_or(0);

        let new_content = match mode {
            WriteMode::Append => {
                let mut merged = existing
                    .as_ref()
                    .map(|f| f.content.clone())
                    .unwrap_or_default();
                merged.extend_from_slice(content);
                merged
            }
            WriteMode::Overwrite => {
                let base = existing
                    .as_ref()
                    .map(|f| f.content.clone())
                    .unwrap_or_default();
                let offset = offset as usize;
                if offset > base.len() {
                    return Err(ServiceError::invalid_offset(
                        "overwrite offset is past end of file",
                    ));
                }
                let mut merged = base;
                let end = offset + content.len();
                if merged.len() < end {
                    merged.resize(end, 0);
                }
                merged[offset..end].copy_from_slice(content);
                merged
            }
            WriteMode::Truncate => content.to_vec(),
        };

        let new_size = new_content.len() as i64;
        if new_size as u64 > self.config.max_file_bytes {
            return Err(ServiceError::new(
                ErrorCode::PayloadTooLarge,
                "file exceeds the per-file limit",
            ));
        }
        let used = sum_active_sizes(&mut *locked.conn(), fp, &project).await?;
        if (used - existing_size + new_size) as u64 > self.config.max_project_bytes {
            return Err(ServiceError::new(
                ErrorCode::QuotaExceeded,
                "project byte quota exceeded",
            ));
        }

        match existing {
            Some(file) => {
                sqlx::query(
                    "UPDATE mcp_files SET content = $1, size = $2, updated_at = $3 WHERE id = $4",
                )
                .bind(new_content)
                .bind(new_size)
                .bind(now)
                .bind(file.id)
                .execute(&mut *locked.conn())
                .await?;
            }
            None => {
                // a soft-deleted row on this path gets revived instead of
                // stacking another row behind the partial unique index
                let revivable: Option<i64> = sqlx::query_scalar(
                    r#"
                    SELECT id FROM mcp_files
                    WHERE tenant_fp = $1 AND project = $2 AND path = $3
                    ORDER BY id DESC LIMIT 1
                    "#,
                )
                .bind(fp)
                .bind(&project)
                .bind(path)
                .fetch_optional(&mut *locked.conn())
                .await?;
                match revivable {
                    Some(id) => {
                        sqlx::query(
                            r#"
                            UPDATE mcp_files
                            SET content = $1, size = $2, created_at = $3, updated_at = $3,
                                deleted = FALSE, deleted_at = NULL
                            WHERE id = $4
                            "#,
                        )
                        .bind(new_content)
                        .bind(new_size)
                        .bind(now)
                        .bind(id)
                        .execute(&mut *locked.conn())
                        .await?;
                    }
                    None => {
                        sqlx::query(
                            r#"
                            INSERT INTO mcp_files
                                (tenant_fp, project, path, content, size,
                                 created_at, updated_at, deleted, deleted_at)
                            VALUES ($1, $2, $3, $4, $5, $6, $6, FALSE, NULL)
                            "#,
                        )
                        .bind(fp)
                        .bind(&project)
                        .bind(path)
                        .bind(new_content)
                        .bind(new_size)
                        .bind(now)
                        .execute(&mut *locked.conn())
                        .await?;
                    }
                }
            }
        }

        queue::enqueue(
            locked.conn(),
            fp,
            &project,
            path,
            JobOperation::Upsert,
            now,
            now,
        )
        .await?;
        locked.commit().await?;

        self.stash_credential(auth, &project, path, now).await;
        debug!(project, path, bytes = content.len(), "write committed");
        Ok(WriteResult {
            bytes_written: content.len() as u64,
        })
    }

    pub async fn delete(
        &self,
        auth: &TenantAuth,
        project: &str,
        path: &str,
        recursive: bool,
    ) -> Result<DeleteResult> {
        let project = validate_project(project)?;
        validate_path(path)?;
        if path.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::PermissionDenied,
                "refusing to delete the project root",
            ));
        }
        let fp = auth.fingerprint();

        let mut locked = self
            .locks
            .acquire(&self.sql, fp, &project, self.config.lock_timeout())
            .await?;
        let now = now_nanos();

        if let Some(file) = load_active_file(&mut *locked.conn(), fp, &project, path).await? {
            sqlx::query(
                "UPDATE mcp_files SET deleted = TRUE, deleted_at = $1, updated_at = $1 WHERE id = $2",
            )
            .bind(now)
            .bind(file.id)
            .execute(&mut *locked.conn())
            .await?;
            queue::enqueue(
                locked.conn(),
                fp,
                &project,
                path,
                JobOperation::Delete,
                now,
                now,
            )
            .await?;
            locked.commit().await?;
            debug!(project, path, "file soft-deleted");
            return Ok(DeleteResult { deleted_count: 1 });
        }

        let descendants = list_descendant_paths(&mut *locked.conn(), fp, &project, path).await?;
        if descendants.is_empty() {
            return Err(ServiceError::not_found("no file or directory at path"));
        }
        if !recursive {
            return Err(ServiceError::new(
                ErrorCode::NotEmpty,
                "directory is not empty",
            ));
        }

        sqlx::query(
            r#"
            UPDATE mcp_files SET deleted = TRUE, deleted_at = $1, updated_at = $1
            WHERE tenant_fp = $2 AND project = $3 AND deleted = FALSE
              AND path LIKE $4 ESCAPE '\'
            "#,
        )
        .bind(now)
        .bind(fp)
        .bind(&project)
        .bind(format!("{}/%", escape_like(path)))
        .execute(&mut *locked.conn())
        .await?;
        for descendant in &descendants {
            queue::enqueue(
                locked.conn(),
                fp,
                &project,
                descendant,
                JobOperation::Delete,
                now,
                now,
            )
            .await?;
        }
        locked.commit().await?;
        debug!(project, path, count = descendants.len(), "directory soft-deleted");
        Ok(DeleteResult {
            deleted_count: descendants.len() as u64,
        })
    }

    pub async fn rename(
        &self,
        auth: &TenantAuth,
        project: &str,
        from: &str,
        to: &str,
        overwrite: bool,
    ) -> Result<RenameResult> {
        let project = validate_project(project)?;
        validate_path(from)?;
        validate_path(to)?;
        if from.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::PermissionDenied,
                "refusing to rename the project root",
            ));
        }
        if to.is_empty() {
            return Err(ServiceError::invalid_path(
                "rename destination must not be the project root",
            ));
        }
        if from == to {
            return Ok(RenameResult { moved_count: 0 });
        }
        if to.starts_with(&format!("{from}/")) {
            return Err(ServiceError::invalid_path(
                "cannot move a directory into itself",
            ));
        }
        let fp = auth.fingerprint();

        let mut locked = self
            .locks
            .acquire(&self.sql, fp, &project, self.config.lock_timeout())
            .await?;
        let now = now_nanos();

        let source_file = load_active_file(&mut *locked.conn(), fp, &project, from).await?;
        let mut mappings: Vec<(String, String)> = Vec::new();
        let mut overwritten: Vec<String> = Vec::new();

        if source_file.is_some() {
            let dest_file = load_active_file(&mut *locked.conn(), fp, &project, to).await?;
            if count_descendants(&mut *locked.conn(), fp, &project, to).await? > 0 {
                return Err(ServiceError::new(
                    ErrorCode::AlreadyExists,
                    "destination is a directory",
                ));
            }
            if let Some(dest) = dest_file {
                if !overwrite {
                    return Err(ServiceError::new(
                        ErrorCode::AlreadyExists,
                        "destination already exists",
                    ));
                }
                overwritten.push(dest.path);
            }
            mappings.push((from.to_owned(), to.to_owned()));
        } else {
            let sources = list_descendant_paths(&mut *locked.conn(), fp, &project, from).await?;
            if sources.is_empty() {
                return Err(ServiceError::not_found("no file or directory at path"));
            }
            // directory renames never overwrite anything at the destination
            if load_active_file(&mut *locked.conn(), fp, &project, to)
                .await?
                .is_some()
                || count_descendants(&mut *locked.conn(), fp, &project, to).await? > 0
            {
                return Err(ServiceError::new(
                    ErrorCode::AlreadyExists,
                    "destination already exists",
                ));
            }
            for source in sources {
                let suffix = &source[from.len()..];
                mappings.push((source.clone(), format!("{to}{suffix}")));
            }
        }

        // a destination sitting under an active file would break directory
        // synthesis, same as the parent check on write
        let moved_away: HashSet<&str> = mappings.iter().map(|(old, _)| old.as_str()).collect();
        let mut seen = HashSet::new();
        for (_, new_path) in &mappings {
            if !seen.insert(new_path.clone()) {
                return Err(ServiceError::new(
                    ErrorCode::AlreadyExists,
                    "rename maps two sources to one destination",
                ));
            }
            let blocking: Vec<String> = ancestor_paths(new_path)
                .into_iter()
                .filter(|ancestor| !moved_away.contains(ancestor.as_str()))
                .collect();
            if any_active_file_in(&mut *locked.conn(), fp, &project, &blocking).await? {
                return Err(ServiceError::new(
                    ErrorCode::NotDirectory,
                    "an ancestor of the destination is a file",
                ));
            }
        }

        if !overwritten.is_empty() {
            let placeholders = (0..overwritten.len())
                .map(|i| format!("${}", i + 4))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                r#"
                UPDATE mcp_files SET deleted = TRUE, deleted_at = $1, updated_at = $1
                WHERE tenant_fp = $2 AND project = $3 AND deleted = FALSE AND path IN ({placeholders})
                "#
            );
            let mut query = sqlx::query(&sql).bind(now).bind(fp).bind(&project);
            for path in &overwritten {
                query = query.bind(path);
            }
            query.execute(&mut *locked.conn()).await?;
            for path in &overwritten {
                queue::enqueue(
                    locked.conn(),
                    fp,
                    &project,
                    path,
                    JobOperation::Delete,
                    now,
                    now,
                )
                .await?;
            }
        }

        for (old_path, new_path) in &mappings {
            sqlx::query(
                r#"
                UPDATE mcp_files SET path = $1, updated_at = $2
                WHERE tenant_fp = $3 AND project = $4 AND path = $5 AND deleted = FALSE
                "#,
            )
            .bind(new_path)
            .bind(now)
            .bind(fp)
            .bind(&project)
            .bind(old_path)
            .execute(&mut *locked.conn())
            .await?;
            queue::enqueue(
                locked.conn(),
                fp,
                &project,
                old_path,
                JobOperation::Delete,
                now,
                now,
            )
            .await?;
            queue::enqueue(
                locked.conn(),
                fp,
                &project,
                new_path,
                JobOperation::Upsert,
                now,
                now,
            )
            .await?;
        }

        locked.commit().await?;
        for (_, new_path) in &mappings {
            self.stash_credential(auth, &project, new_path, now).await;
        }
        debug!(project, from, to, moved = mappings.len(), "rename committed");
        Ok(RenameResult {
            moved_count: mappings.len() as u64,
        })
    }

    pub async fn list(
        &self,
        auth: &TenantAuth,
        project: &str,
        path: &str,
        depth: i64,
        limit: i64,
    ) -> Result<ListResult> {
        let project = validate_project(project)?;
        validate_path(path)?;
        if depth < 0 {
            return Err(ServiceError::invalid_offset("depth must be non-negative"));
        }
        let limit = if limit <= 0 {
            self.config.list_limit_default
        } else {
            limit.min(self.config.list_limit_max)
        } as usize;
        let fp = auth.fingerprint();

        if depth == 0 {
            let stat = self.stat(auth, &project, path).await?;
            if !stat.exists {
                return Err(ServiceError::not_found("no file or directory at path"));
            }
            return Ok(ListResult {
                entries: vec![ListEntry {
                    path: path.to_owned(),
                    entry_type: stat.entry_type.unwrap_or(EntryType::Directory),
                    size: stat.size,
                    created_at: stat.created_at,
                    updated_at: stat.updated_at,
                }],
                has_more: false,
            });
        }

        // scan prefix for the LIKE filter; strip also removes the '/'
        // separating the prefix from the first relative segment
        let (scan_prefix, strip) = if path.is_empty() {
            (String::new(), 1)
        } else {
            (format!("{path}/"), path.len() + 1)
        };
        let rows = list_descendant_rows(self.sql.pool(), fp, &project, &scan_prefix).await?;
        if rows.is_empty() && !path.is_empty() {
            // distinguish an empty page on a real file from a missing path
            let stat = self.stat(auth, &project, path).await?;
            if !stat.exists {
                return Err(ServiceError::not_found("no file or directory at path"));
            }
        }

        let depth = depth as usize;
        let mut entries: BTreeMap<String, ListEntry> = BTreeMap::new();
        for row in &rows {
            let rel = &row.path[strip..];
            let segments: Vec<&str> = rel.split('/').collect();
            if segments.len() <= depth {
                entries.insert(
                    row.path.clone(),
                    ListEntry {
                        path: row.path.clone(),
                        entry_type: EntryType::File,
                        size: row.size,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                    },
                );
            }
            let dir_levels = depth.min(segments.len().saturating_sub(1));
            for level in 1..=dir_levels {
                let dir_path = format!("{path}/{}", segments[..level].join("/"));
                let entry = entries.entry(dir_path.clone()).or_insert(ListEntry {
                    path: dir_path,
                    entry_type: EntryType::Directory,
                    size: 0,
                    created_at: 0,
                    updated_at: 0,
                });
                if entry.entry_type == EntryType::Directory {
                    entry.updated_at = entry.updated_at.max(row.updated_at);
                }
            }
        }

        let total = entries.len();
        let entries: Vec<ListEntry> = entries.into_values().take(limit).collect();
        Ok(ListResult {
            has_more: total > entries.len(),
            entries,
        })
    }

    pub async fn search(
        &self,
        auth: &TenantAuth,
        project: &str,
        query: &str,
        path_prefix: &str,
        limit: i64,
    ) -> Result<SearchResponse> {
        self.search.search(auth, project, query, path_prefix, limit).await
    }

    /// Seal the caller's api key for the async worker. Failure here only
    /// degrades indexing to lexical, so it is logged and swallowed.
    async fn stash_credential(&self, auth: &TenantAuth, project: &str, path: &str, updated_at: i64) {
        if !self.config.search_enabled || auth.api_key().is_empty() {
            return;
        }
        let Some(cipher) = &self.cipher else {
            return;
        };
        let fp = auth.fingerprint();
        let key = credential_cache_key(
            &self.config.credential_cache_prefix,
            fp,
            project,
            path,
            updated_at,
        );
        let aad = credential_aad(fp, project, path, updated_at);
        match cipher.encrypt(auth.api_key(), &aad) {
            Ok(payload) => {
                let ttl = Duration::from_secs(self.config.credential_cache_ttl_secs);
                if let Err(error) = self.credentials.store(&key, &payload, ttl).await {
                    warn!(?error, project, path, "failed to stash credential envelope");
                }
            }
            Err(error) => {
                warn!(?error, project, path, "failed to seal credential envelope");
            }
        }
    }
}

pub(crate) struct FileRow {
    pub id: i64,
    pub path: String,
    pub content: Vec<u8>,
    pub size: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) struct DescendantRow {
    pub path: String,
    pub size: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) async fn load_active_file<'e, E>(
    executor: E,
    tenant_fp: &str,
    project: &str,
    path: &str,
) -> sqlx::Result<Option<FileRow>>
where
    E: Executor<'e, Database = Any>,
{
    let row = sqlx::query(
        r#"
        SELECT id, path, content, size, created_at, updated_at
        FROM mcp_files
        WHERE tenant_fp = $1 AND project = $2 AND path = $3 AND deleted = FALSE
        "#,
    )
    .bind(tenant_fp)
    .bind(project)
    .bind(path)
    .fetch_optional(executor)
    .await?;
    row.map(|row| {
        Ok(FileRow {
            id: row.try_get("id")?,
            path: row.try_get("path")?,
            content: row.try_get("content")?,
            size: row.try_get("size")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn count_descendants<'e, E>(
    executor: E,
    tenant_fp: &str,
    project: &str,
    path: &str,
) -> sqlx::Result<i64>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query_scalar(
        r#"
        SELECT CAST(COUNT(*) AS BIGINT) FROM mcp_files
        WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
          AND path LIKE $3 ESCAPE '\'
        "#,
    )
    .bind(tenant_fp)
    .bind(project)
    .bind(format!("{}/%", escape_like(path)))
    .fetch_one(executor)
    .await
}

async fn max_updated_at<'e, E>(
    executor: E,
    tenant_fp: &str,
    project: &str,
    path: &str,
) -> sqlx::Result<i64>
where
    E: Executor<'e, Database = Any>,
{
    let (sql, like) = if path.is_empty() {
        (
            r#"
            SELECT CAST(COALESCE(MAX(updated_at), 0) AS BIGINT) FROM mcp_files
            WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
            "#,
            None,
        )
    } else {
        (
            r#"
            SELECT CAST(COALESCE(MAX(updated_at), 0) AS BIGINT) FROM mcp_files
            WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
              AND path LIKE $3 ESCAPE '\'
            "#,
            Some(format!("{}/%", escape_like(path))),
        )
    };
    let mut query = sqlx::query_scalar(sql).bind(tenant_fp).bind(project);
    if let Some(like) = like {
        query = query.bind(like);
    }
    query.fetch_one(executor).await
}

async fn sum_active_sizes(
    conn: &mut AnyConnection,
    tenant_fp: &str,
    project: &str,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"
        SELECT CAST(COALESCE(SUM(size), 0) AS BIGINT) FROM mcp_files
        WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
        "#,
    )
    .bind(tenant_fp)
    .bind(project)
    .fetch_one(conn)
    .await
}

async fn any_active_file_in(
    conn: &mut AnyConnection,
    tenant_fp: &str,
    project: &str,
    paths: &[String],
) -> sqlx::Result<bool> {
    if paths.is_empty() {
        return Ok(false);
    }
    let placeholders = (0..paths.len())
        .map(|i| format!("${}", i + 3))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r#"
        SELECT CAST(COUNT(*) AS BIGINT) FROM mcp_files
        WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE AND path IN ({placeholders})
        "#
    );
    let mut query = sqlx::query_scalar(&sql).bind(tenant_fp).bind(project);
    for path in paths {
        query = query.bind(path);
    }
    let count: i64 = query.fetch_one(conn).await?;
    Ok(count > 0)
}

async fn list_descendant_paths(
    conn: &mut AnyConnection,
    tenant_fp: &str,
    project: &str,
    path: &str,
) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT path FROM mcp_files
        WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
          AND path LIKE $3 ESCAPE '\'
        ORDER BY path ASC
        "#,
    )
    .bind(tenant_fp)
    .bind(project)
    .bind(format!("{}/%", escape_like(path)))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(|row| row.try_get("path")).collect()
}

async fn list_descendant_rows<'e, E>(
    executor: E,
    tenant_fp: &str,
    project: &str,
    prefix: &str,
) -> sqlx::Result<Vec<DescendantRow>>
where
    E: Executor<'e, Database = Any>,
{
    let rows = sqlx::query(
        r#"
        SELECT path, size, created_at, updated_at FROM mcp_files
        WHERE tenant_fp = $1 AND project = $2 AND deleted = FALSE
          AND path LIKE $3 ESCAPE '\'
        ORDER BY path ASC
        "#,
    )
    .bind(tenant_fp)
    .bind(project)
    .bind(format!("{}%", escape_like(prefix)))
    .fetch_all(executor)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(DescendantRow {
                path: row.try_get("path")?,
                size: row.try_get("size")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect()
}

fn slice_content(content: &[u8], offset: i64, length: i64) -> Vec<u8> {
    let offset = offset as usize;
    if offset >= content.len() {
        return Vec::new();
    }
    let end = if length < 0 {
        content.len()
    } else {
        (offset + length as usize).min(content.len())
    };
    content[offset..end].to_vec()
}

/// Escape LIKE wildcards in user paths; `_` is a legal path byte.
pub(crate) fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
