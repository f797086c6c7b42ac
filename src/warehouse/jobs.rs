// Job configuration and metric-to-table mapping reads (plus operator-side registration).

use std::collections::HashMap;

use sqlx::Row;
use sqlx::any::AnyRow;
use tracing::{error, instrument, warn};

use super::Warehouse;
use crate::error::{BatchResult, ConfigError};
use crate::models::{
    Job, JobDefinition, JobMetric, JobRows, MetricTableMapping, normalize_metric_name,
    split_aggregation_types,
};

impl Warehouse {
    /// Enabled jobs with their definition (if any) and metric rows.
    #[instrument(skip(self), fields(repo = "warehouse", operation = "load_enabled_jobs"))]
    pub async fn load_enabled_jobs(&self) -> BatchResult<Vec<JobRows>> {
        let rows = sqlx::query(
            "SELECT j.job_name, j.job_type, j.event_name, j.create_time, j.update_time,
                    d.job_name AS def_job_name, d.focal_entity, d.focal_type, d.resource_filter,
                    d.granularity, d.job_delay, d.timezone, d.start_time, d.end_time, d.job_sub_type
             FROM batch_jobs j
             LEFT JOIN batchjob_definitions d ON d.job_name = j.job_name
             WHERE j.enable_flag = TRUE
             ORDER BY j.job_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = match row.try_get("job_name") {
                Ok(name) => name,
                Err(e) => {
                    error!(error = %e, "job row skipped: job_name unreadable");
                    continue;
                }
            };
            match parse_job_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(job = %name, error = %e, "job row unreadable");
                    jobs.push(JobRows::unreadable(name, e));
                }
            }
        }

        let metric_rows = sqlx::query(
            "SELECT m.job_name, m.metric_name, m.entity, m.aggregation_types
             FROM batchjob_metrics m
             JOIN batch_jobs j ON j.job_name = m.job_name
             WHERE j.enable_flag = TRUE
             ORDER BY m.job_name, m.metric_name, m.entity",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_job: HashMap<String, (Vec<JobMetric>, Vec<(String, ConfigError)>)> =
            HashMap::new();
        for row in &metric_rows {
            let job_name: String = match row.try_get("job_name") {
                Ok(name) => name,
                Err(e) => {
                    error!(error = %e, "metric row skipped: job_name unreadable");
                    continue;
                }
            };
            let (metrics, failed) = by_job.entry(job_name).or_default();
            match parse_metric_row(row) {
                Ok(m) => metrics.push(m),
                Err(e) => {
                    let metric = row
                        .try_get::<String, _>("metric_name")
                        .unwrap_or_else(|_| "<unreadable>".to_string());
                    failed.push((metric, e));
                }
            }
        }

        for j in &mut jobs {
            if let Some((metrics, failed)) = by_job.remove(&j.job.name) {
                j.metrics = metrics;
                j.unreadable_metrics = failed;
            }
        }
        Ok(jobs)
    }

    /// Tables holding raw values for `metric` (compared after normalization).
    #[instrument(skip(self), fields(repo = "warehouse", operation = "mappings_for"))]
    pub async fn mappings_for(&self, metric: &str) -> BatchResult<Vec<MetricTableMapping>> {
        let rows = sqlx::query(
            "SELECT metricname, tablename, layout, entity_column, timestamp_column, name_column, value_column
             FROM metricsandtables
             WHERE REPLACE(LOWER(metricname), '.', '_') = $1
             ORDER BY tablename",
        )
        .bind(normalize_metric_name(metric))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let layout: String = row.try_get("layout")?;
            out.push(MetricTableMapping {
                metric_name: row.try_get("metricname")?,
                table_name: row.try_get("tablename")?,
                layout: layout.parse()?,
                entity_column: row.try_get("entity_column")?,
                timestamp_column: row.try_get("timestamp_column")?,
                name_column: row.try_get("name_column")?,
                value_column: row.try_get("value_column")?,
            });
        }
        Ok(out)
    }

    /// Creates or replaces a job, its definition and its metric list in one transaction.
    #[instrument(skip_all, fields(repo = "warehouse", operation = "register_job", job = %job.name))]
    pub async fn register_job(
        &self,
        job: &Job,
        definition: &JobDefinition,
        metrics: &[JobMetric],
    ) -> BatchResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO batch_jobs (job_name, job_type, event_name, enable_flag, create_time, update_time)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (job_name) DO UPDATE SET
                job_type = excluded.job_type,
                event_name = excluded.event_name,
                enable_flag = excluded.enable_flag,
                update_time = excluded.update_time",
        )
        .bind(job.name.as_str())
        .bind(job.job_type.as_str())
        .bind(job.event_name.as_str())
        .bind(job.enabled)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO batchjob_definitions
                (job_name, focal_entity, focal_type, resource_filter, granularity, job_delay,
                 timezone, start_time, end_time, job_sub_type)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (job_name) DO UPDATE SET
                focal_entity = excluded.focal_entity,
                focal_type = excluded.focal_type,
                resource_filter = excluded.resource_filter,
                granularity = excluded.granularity,
                job_delay = excluded.job_delay,
                timezone = excluded.timezone,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                job_sub_type = excluded.job_sub_type",
        )
        .bind(job.name.as_str())
        .bind(definition.focal_entity.clone())
        .bind(definition.focal_type.clone())
        .bind(definition.resource_filter.clone())
        .bind(definition.granularity.as_str())
        .bind(definition.delay)
        .bind(definition.timezone.clone())
        .bind(definition.start_time)
        .bind(definition.end_time)
        .bind(definition.job_sub_type.clone())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM batchjob_metrics WHERE job_name = $1")
            .bind(job.name.as_str())
            .execute(&mut *tx)
            .await?;

        for m in metrics {
            sqlx::query(
                "INSERT INTO batchjob_metrics (job_name, metric_name, entity, aggregation_types)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(job.name.as_str())
            .bind(m.metric_name.as_str())
            .bind(m.entity.as_str())
            .bind(m.aggregation_types.join(","))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Toggles a job without touching its definition.
    pub async fn set_job_enabled(&self, job_name: &str, enabled: bool, now_ms: i64) -> BatchResult<u64> {
        let r = sqlx::query("UPDATE batch_jobs SET enable_flag = $1, update_time = $2 WHERE job_name = $3")
            .bind(enabled)
            .bind(now_ms)
            .bind(job_name)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    pub async fn register_mapping(&self, m: &MetricTableMapping) -> BatchResult<()> {
        sqlx::query(
            "INSERT INTO metricsandtables
                (metricname, tablename, layout, entity_column, timestamp_column, name_column, value_column)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (metricname, tablename) DO UPDATE SET
                layout = excluded.layout,
                entity_column = excluded.entity_column,
                timestamp_column = excluded.timestamp_column,
                name_column = excluded.name_column,
                value_column = excluded.value_column",
        )
        .bind(m.metric_name.as_str())
        .bind(m.table_name.as_str())
        .bind(m.layout.as_str())
        .bind(m.entity_column.clone())
        .bind(m.timestamp_column.as_str())
        .bind(m.name_column.clone())
        .bind(m.value_column.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn unreadable(table: &'static str) -> impl Fn(sqlx::Error) -> ConfigError {
    move |e| ConfigError::UnreadableRow {
        table,
        reason: e.to_string(),
    }
}

fn parse_job_row(row: &AnyRow) -> Result<JobRows, ConfigError> {
    let jobs_err = unreadable("batch_jobs");
    let job = Job {
        name: row.try_get("job_name").map_err(&jobs_err)?,
        job_type: row.try_get("job_type").map_err(&jobs_err)?,
        event_name: row.try_get("event_name").map_err(&jobs_err)?,
        enabled: true,
        created_at: row.try_get("create_time").map_err(&jobs_err)?,
        updated_at: row.try_get("update_time").map_err(&jobs_err)?,
    };
    let def_err = unreadable("batchjob_definitions");
    let def_job_name: Option<String> = row.try_get("def_job_name").map_err(&def_err)?;
    let definition = match def_job_name {
        None => None,
        Some(_) => Some(JobDefinition {
            focal_entity: row.try_get("focal_entity").map_err(&def_err)?,
            focal_type: row.try_get("focal_type").map_err(&def_err)?,
            resource_filter: row.try_get("resource_filter").map_err(&def_err)?,
            granularity: row.try_get("granularity").map_err(&def_err)?,
            delay: row.try_get("job_delay").map_err(&def_err)?,
            timezone: row.try_get("timezone").map_err(&def_err)?,
            start_time: row.try_get("start_time").map_err(&def_err)?,
            end_time: row.try_get("end_time").map_err(&def_err)?,
            job_sub_type: row.try_get("job_sub_type").map_err(&def_err)?,
        }),
    };
    Ok(JobRows {
        job,
        definition,
        metrics: Vec::new(),
        unreadable: None,
        unreadable_metrics: Vec::new(),
    })
}

fn parse_metric_row(row: &AnyRow) -> Result<JobMetric, ConfigError> {
    let err = unreadable("batchjob_metrics");
    let stored: String = row.try_get("aggregation_types").map_err(&err)?;
    Ok(JobMetric {
        metric_name: row.try_get("metric_name").map_err(&err)?,
        entity: row.try_get("entity").map_err(&err)?,
        aggregation_types: split_aggregation_types(&stored),
    })
}
