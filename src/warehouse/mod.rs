// Warehouse access: job configuration, metric mappings, raw metric tables, run state and
// aggregation results. sqlx Any pool; PostgreSQL in production, SQLite file in tests.
// All SQL sticks to the dialect subset both accept ($n placeholders, ON CONFLICT upserts,
// CAST(.. AS TEXT)). Timestamps are BIGINT epoch milliseconds (UTC).

mod jobs;
mod results;
pub mod source;
mod state;

use std::path::Path;
use std::time::Duration;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

pub use state::JobState;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Warehouse {
    pool: AnyPool,
}

impl Warehouse {
    /// `url` is `postgres://...` or `sqlite:<path>?mode=rwc`.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        if let Some(path) = sqlite_path(url)
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Creates the engine-owned tables. Safe to run repeatedly.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batch_jobs (
                job_name TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                event_name TEXT NOT NULL,
                enable_flag BOOLEAN NOT NULL,
                create_time BIGINT NOT NULL,
                update_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batchjob_definitions (
                job_name TEXT PRIMARY KEY,
                focal_entity TEXT,
                focal_type TEXT,
                resource_filter TEXT,
                granularity TEXT NOT NULL,
                job_delay BIGINT NOT NULL,
                timezone TEXT,
                start_time BIGINT,
                end_time BIGINT,
                job_sub_type TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batchjob_metrics (
                job_name TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                entity TEXT NOT NULL,
                aggregation_types TEXT NOT NULL,
                PRIMARY KEY (job_name, metric_name, entity)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metricsandtables (
                metricname TEXT NOT NULL,
                tablename TEXT NOT NULL,
                layout TEXT NOT NULL,
                entity_column TEXT,
                timestamp_column TEXT NOT NULL,
                name_column TEXT,
                value_column TEXT,
                PRIMARY KEY (metricname, tablename)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batch_job_state (
                job_name TEXT PRIMARY KEY,
                last_fired_at BIGINT,
                last_status TEXT NOT NULL,
                last_error TEXT,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregation_results (
                job_name TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                entity TEXT NOT NULL,
                window_start BIGINT NOT NULL,
                window_end BIGINT NOT NULL,
                granularity TEXT NOT NULL,
                aggregation_type TEXT NOT NULL,
                result_name TEXT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                created_at BIGINT NOT NULL,
                PRIMARY KEY (job_name, metric_name, entity, window_start, aggregation_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aggregation_results_window ON aggregation_results(window_start)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// File path of a `sqlite:` URL, without query string.
fn sqlite_path(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty() && path != ":memory:").then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_strips_scheme_and_query() {
        assert_eq!(sqlite_path("sqlite:data/wh.db?mode=rwc"), Some("data/wh.db"));
        assert_eq!(sqlite_path("sqlite:///tmp/x.db"), Some("/tmp/x.db"));
        assert_eq!(sqlite_path("sqlite::memory:"), None);
        assert_eq!(sqlite_path("postgres://u:p@h/db"), None);
    }
}
