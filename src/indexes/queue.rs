//! Durable index-job queue, a single SQL table. Enqueue always happens in
//! the transaction that mutates the file rows, so a committed file change
//! has at least one matching pending job (at-least-once; the worker is
//! idempotent and drops stale jobs via the staleness guard).

use sqlx::{AnyConnection, Row};
use tracing::trace;

use crate::db::SqlDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOperation {
    Upsert,
    Delete,
}

impl JobOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            JobOperation::Upsert => "UPSERT",
            JobOperation::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "UPSERT" => Some(JobOperation::Upsert),
            "DELETE" => Some(JobOperation::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// One claimed queue row. `operation` stays raw so the worker can fail
/// unknown operations terminally instead of refusing to claim them.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub id: i64,
    pub tenant_fp: String,
    pub project: String,
    pub file_path: String,
    pub operation: String,
    pub file_updated_at: Option<i64>,
    pub retry_count: i64,
}

/// Insert a pending job inside the caller's mutation transaction.
pub async fn enqueue(
    conn: &mut AnyConnection,
    tenant_fp: &str,
    project: &str,
    file_path: &str,
    operation: JobOperation,
    file_updated_at: i64,
    now: i64,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mcp_file_index_jobs
            (tenant_fp, project, file_path, operation, file_updated_at,
             status, retry_count, available_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $6, $6)
        "#,
    )
    .bind(tenant_fp)
    .bind(project)
    .bind(file_path)
    .bind(operation.as_str())
    .bind(file_updated_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    trace!(project, file_path, operation = operation.as_str(), "index job enqueued");
    Ok(())
}

/// Claim up to `batch_size` due pending jobs: select in id order, flip them
/// to `processing`, commit. With skip-locked reads concurrent workers pass
/// each other; without them the single-node dialect serializes on the
/// transaction anyway.
pub async fn claim_batch(db: &SqlDb, now: i64, batch_size: i64) -> sqlx::Result<Vec<IndexJob>> {
    let mut tx = db.pool().begin().await?;

    let mut select = String::from(
        r#"
        SELECT id, tenant_fp, project, file_path, operation, file_updated_at, retry_count
        FROM mcp_file_index_jobs
        WHERE status = 'pending' AND available_at <= $1
        ORDER BY id ASC
        LIMIT $2
        "#,
    );
    if db.dialect().supports_skip_locked() {
        select.push_str(" FOR UPDATE SKIP LOCKED");
    }
    let rows = sqlx::query(&select)
        .bind(now)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

    let jobs: Vec<IndexJob> = rows
        .into_iter()
        .map(|row| {
            Ok(IndexJob {
                id: row.try_get("id")?,
                tenant_fp: row.try_get("tenant_fp")?,
                project: row.try_get("project")?,
                file_path: row.try_get("file_path")?,
                operation: row.try_get("operation")?,
                file_updated_at: row.try_get("file_updated_at")?,
                retry_count: row.try_get("retry_count")?,
            })
        })
        .collect::<sqlx::Result<_>>()?;

    if jobs.is_empty() {
        tx.commit().await?;
        return Ok(jobs);
    }

    // ids come straight out of the select above, inlining them is safe
    let id_list = jobs
        .iter()
        .map(|job| job.id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    sqlx::query(&format!(
        "UPDATE mcp_file_index_jobs SET status = 'processing', updated_at = $1 WHERE id IN ({id_list})"
    ))
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    trace!(count = jobs.len(), "claimed index jobs");
    Ok(jobs)
}

pub async fn mark_done(db: &SqlDb, job_id: i64, now: i64) -> sqlx::Result<()> {
    set_status(db, job_id, JobStatus::Done, now).await
}

pub async fn mark_failed(db: &SqlDb, job_id: i64, now: i64) -> sqlx::Result<()> {
    set_status(db, job_id, JobStatus::Failed, now).await
}

async fn set_status(db: &SqlDb, job_id: i64, status: JobStatus, now: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE mcp_file_index_jobs SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status.as_str())
        .bind(now)
        .bind(job_id)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Put a failed job back in the pending state with one more retry on the
/// clock and a pushed-out `available_at`.
pub async fn reschedule(db: &SqlDb, job_id: i64, available_at: i64, now: i64) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE mcp_file_index_jobs
        SET status = 'pending', retry_count = retry_count + 1, available_at = $1, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(available_at)
    .bind(now)
    .bind(job_id)
    .execute(db.pool())
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_round_trip_through_their_wire_form() {
        assert_eq!(JobOperation::parse("UPSERT"), Some(JobOperation::Upsert));
        assert_eq!(JobOperation::parse("DELETE"), Some(JobOperation::Delete));
        assert_eq!(JobOperation::parse("COMPACT"), None);
        assert_eq!(JobOperation::Upsert.as_str(), "UPSERT");
    }

    #[test]
    fn status_strings_are_lowercase() {
        assert_eq!(JobStatus::Pending.as_str(), "pending");
        assert_eq!(JobStatus::Processing.as_str(), "processing");
        assert_eq!(JobStatus::Done.as_str(), "done");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
    }
}
