use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use vigil_core::error::AppError;
use vigil_core::job::{JobStatus, JobStatusRecord};
use vigil_core::models::{ErrorLogEntry, MethodUsed, VerificationRecord};
use vigil_core::traits::VerificationSink;

/// PostgreSQL-backed verification sink.
///
/// Sites are keyed by URL; re-verifying a site replaces its row, and
/// `updated_at` only moves when the extracted payload's hash changes.
#[derive(Clone)]
pub struct VerificationRepository {
    pool: Pool<Postgres>,
}

impl VerificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The stored result for `url`, if any.
    pub async fn get_site(&self, url: &str) -> Result<Option<VerificationRecord>, AppError> {
        let row = sqlx::query_as::<_, SiteRow>(r#"SELECT * FROM sites WHERE url = $1"#)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    /// When the stored payload for `url` last changed.
    pub async fn site_changed_at(&self, url: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as(r#"SELECT updated_at FROM sites WHERE url = $1"#)
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.map(|(t,)| t))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobStatusRecord>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"SELECT * FROM verification_jobs WHERE job_id = $1"#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Most recent error-log entries of a job, newest first.
    pub async fn recent_errors(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<ErrorLogEntry>, AppError> {
        let rows = sqlx::query_as::<_, ErrorRow>(
            r#"
            SELECT * FROM error_logs
            WHERE job_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SiteRow {
    url: String,
    name: String,
    is_active: bool,
    resolved_url: Option<String>,
    category: String,
    contacts: serde_json::Value,
    staff: serde_json::Value,
    method_used: Option<String>,
    #[allow(dead_code)]
    data_hash: String,
    correlation_id: String,
    job_id: String,
    checked_at: DateTime<Utc>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl TryFrom<SiteRow> for VerificationRecord {
    type Error = AppError;

    fn try_from(row: SiteRow) -> Result<Self, Self::Error> {
        let method_used = row
            .method_used
            .map(|m| serde_json::from_value::<MethodUsed>(serde_json::Value::String(m)))
            .transpose()?;

        Ok(VerificationRecord {
            name: row.name,
            url: row.url,
            is_active: row.is_active,
            resolved_url: row.resolved_url,
            category: row.category,
            contacts: serde_json::from_value(row.contacts)?,
            staff: serde_json::from_value(row.staff)?,
            method_used,
            checked_at: row.checked_at,
            correlation_id: row.correlation_id,
            job_id: row.job_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    status: String,
    total_processed: i64,
    active_count: i64,
    failed_count: i64,
    stats: serde_json::Value,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for JobStatusRecord {
    fn from(row: JobRow) -> Self {
        JobStatusRecord {
            job_id: row.job_id,
            status: row.status.parse().unwrap_or(JobStatus::Failed),
            total_processed: row.total_processed as u64,
            active_count: row.active_count as u64,
            failed_count: row.failed_count as u64,
            stats: row.stats,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ErrorRow {
    #[allow(dead_code)]
    id: Uuid,
    error_type: String,
    message: String,
    job_id: String,
    context: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<ErrorRow> for ErrorLogEntry {
    fn from(row: ErrorRow) -> Self {
        ErrorLogEntry {
            error_type: row.error_type,
            message: row.message,
            job_id: row.job_id,
            context: row.context,
            created_at: row.created_at,
        }
    }
}

impl VerificationSink for VerificationRepository {
    async fn upsert_result(&self, record: &VerificationRecord) -> Result<(), AppError> {
        let contacts = serde_json::to_value(&record.contacts)?;
        let staff = serde_json::to_value(&record.staff)?;

        sqlx::query(
            r#"
            INSERT INTO sites (
                url, name, is_active, resolved_url, category, contacts, staff,
                method_used, data_hash, correlation_id, job_id, checked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (url) DO UPDATE SET
                name = EXCLUDED.name,
                is_active = EXCLUDED.is_active,
                resolved_url = EXCLUDED.resolved_url,
                category = EXCLUDED.category,
                contacts = EXCLUDED.contacts,
                staff = EXCLUDED.staff,
                method_used = EXCLUDED.method_used,
                data_hash = EXCLUDED.data_hash,
                correlation_id = EXCLUDED.correlation_id,
                job_id = EXCLUDED.job_id,
                checked_at = EXCLUDED.checked_at,
                updated_at = CASE
                    WHEN sites.data_hash = EXCLUDED.data_hash THEN sites.updated_at
                    ELSE NOW()
                END
            "#,
        )
        .bind(&record.url)
        .bind(&record.name)
        .bind(record.is_active)
        .bind(&record.resolved_url)
        .bind(&record.category)
        .bind(&contacts)
        .bind(&staff)
        .bind(record.method_used.map(|m| m.as_str()))
        .bind(record.data_hash())
        .bind(&record.correlation_id)
        .bind(&record.job_id)
        .bind(record.checked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(url = %record.url, job_id = %record.job_id, "Site result stored");
        Ok(())
    }

    async fn upsert_job(&self, job: &JobStatusRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO verification_jobs (
                job_id, status, total_processed, active_count, failed_count, stats, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO UPDATE SET
                status = EXCLUDED.status,
                total_processed = EXCLUDED.total_processed,
                active_count = EXCLUDED.active_count,
                failed_count = EXCLUDED.failed_count,
                stats = EXCLUDED.stats,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status.as_str())
        .bind(job.total_processed as i64)
        .bind(job.active_count as i64)
        .bind(job.failed_count as i64)
        .bind(if job.stats.is_null() {
            serde_json::json!({})
        } else {
            job.stats.clone()
        })
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn append_error(&self, entry: &ErrorLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO error_logs (error_type, message, job_id, context, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.error_type)
        .bind(&entry.message)
        .bind(&entry.job_id)
        .bind(&entry.context)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
