// Per-job run state: last successful fire time and last outcome.
// A failure never advances last_fired_at, so the next tick retries the same fire.

use serde::Serialize;
use sqlx::Row;
use tracing::instrument;

use super::Warehouse;
use crate::error::BatchResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_name: String,
    pub last_fired_at: Option<i64>,
    pub last_status: String,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl Warehouse {
    pub async fn job_state(&self, job_name: &str) -> BatchResult<Option<JobState>> {
        let row = sqlx::query(
            "SELECT job_name, last_fired_at, last_status, last_error, updated_at
             FROM batch_job_state WHERE job_name = $1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(JobState {
            job_name: row.try_get("job_name")?,
            last_fired_at: row.try_get("last_fired_at")?,
            last_status: row.try_get("last_status")?,
            last_error: row.try_get("last_error")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    #[instrument(skip(self), fields(repo = "warehouse", operation = "record_success"))]
    pub async fn record_success(&self, job_name: &str, fired_at_ms: i64, now_ms: i64) -> BatchResult<()> {
        sqlx::query(
            "INSERT INTO batch_job_state (job_name, last_fired_at, last_status, last_error, updated_at)
             VALUES ($1, $2, 'ok', NULL, $3)
             ON CONFLICT (job_name) DO UPDATE SET
                last_fired_at = excluded.last_fired_at,
                last_status = 'ok',
                last_error = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(job_name)
        .bind(fired_at_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(repo = "warehouse", operation = "record_failure"))]
    pub async fn record_failure(&self, job_name: &str, error: &str, now_ms: i64) -> BatchResult<()> {
        sqlx::query(
            "INSERT INTO batch_job_state (job_name, last_fired_at, last_status, last_error, updated_at)
             VALUES ($1, NULL, 'failed', $2, $3)
             ON CONFLICT (job_name) DO UPDATE SET
                last_status = 'failed',
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(job_name)
        .bind(error)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
