// Aggregation result writes: batched upserts on the natural key.

use sqlx::Row;
use tracing::instrument;

use super::Warehouse;
use crate::error::BatchResult;
use crate::models::AggregationResult;

impl Warehouse {
    /// Upserts one batch in a single transaction: all rows land or none do, so the
    /// caller can retry the whole batch. Re-running a window overwrites its values.
    #[instrument(skip(self, batch), fields(repo = "warehouse", operation = "write_batch", rows = batch.len()))]
    pub async fn write_batch(&self, batch: &[AggregationResult]) -> BatchResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for r in batch {
            sqlx::query(
                "INSERT INTO aggregation_results
                    (job_name, metric_name, entity, window_start, window_end, granularity,
                     aggregation_type, result_name, value, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (job_name, metric_name, entity, window_start, aggregation_type)
                 DO UPDATE SET
                    window_end = excluded.window_end,
                    granularity = excluded.granularity,
                    result_name = excluded.result_name,
                    value = excluded.value,
                    created_at = excluded.created_at",
            )
            .bind(r.job_name.as_str())
            .bind(r.metric_name.as_str())
            .bind(r.entity.as_str())
            .bind(r.window_start)
            .bind(r.window_end)
            .bind(r.granularity.as_str())
            .bind(r.aggregation_type.as_str())
            .bind(r.result_name.as_str())
            .bind(r.value)
            .bind(r.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(batch.len())
    }

    /// Stored results for a job, ordered by window, metric, entity, type.
    #[instrument(skip(self), fields(repo = "warehouse", operation = "results_for_job"))]
    pub async fn results_for_job(&self, job_name: &str) -> BatchResult<Vec<AggregationResult>> {
        let rows = sqlx::query(
            "SELECT job_name, metric_name, entity, window_start, window_end, granularity,
                    aggregation_type, result_name, value, created_at
             FROM aggregation_results
             WHERE job_name = $1
             ORDER BY window_start, metric_name, entity, aggregation_type",
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(AggregationResult {
                job_name: row.try_get("job_name")?,
                metric_name: row.try_get("metric_name")?,
                entity: row.try_get("entity")?,
                window_start: row.try_get("window_start")?,
                window_end: row.try_get("window_end")?,
                granularity: row.try_get("granularity")?,
                aggregation_type: row.try_get("aggregation_type")?,
                result_name: row.try_get("result_name")?,
                value: row.try_get("value")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }
}
