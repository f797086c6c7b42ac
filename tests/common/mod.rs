// Shared test helpers: temp SQLite warehouse, raw metric tables, job seeding.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use batch_analytics::engine::{Engine, EngineConfig};
use batch_analytics::models::*;
use batch_analytics::retry::RetryPolicy;
use batch_analytics::warehouse::Warehouse;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

pub const ROW_TABLE: &str = "ruleexecutionresults";
pub const COLUMN_TABLE: &str = "nrcell_kpi";

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn ms(s: &str) -> i64 {
    utc(s).timestamp_millis()
}

/// Fresh warehouse in a temp dir. Keep the `TempDir` alive for the test's duration.
pub async fn temp_warehouse() -> (TempDir, Arc<Warehouse>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("warehouse.db");
    let url = format!("sqlite:{}?mode=rwc", path.to_str().unwrap());
    let wh = Warehouse::connect(&url, 2).await.unwrap();
    wh.init().await.unwrap();
    create_raw_tables(&wh).await;
    (dir, Arc::new(wh))
}

pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_secs(1),
        max_concurrent_jobs: 4,
        batch_size: 2,
        job_timeout: Duration::from_secs(10),
        retry: RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        default_timezone: chrono_tz::Tz::UTC,
    }
}

pub fn test_engine(wh: Arc<Warehouse>) -> Engine {
    Engine::new(wh, test_engine_config())
}

/// Row-layout table (name/value pairs) and column-layout table (one column per metric).
/// Values are TEXT/mixed on purpose so coercion is exercised.
async fn create_raw_tables(wh: &Warehouse) {
    sqlx::query(&format!(
        "CREATE TABLE {ROW_TABLE} (
            \"Id\" TEXT NOT NULL,
            \"timestamp\" BIGINT NOT NULL,
            udc_config_name TEXT NOT NULL,
            udc_config_value TEXT,
            region TEXT
        )"
    ))
    .execute(wh.pool())
    .await
    .unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {COLUMN_TABLE} (
            \"Id\" TEXT NOT NULL,
            \"timestamp\" BIGINT NOT NULL,
            dl_prb_util TEXT,
            ul_prb_util TEXT,
            region TEXT
        )"
    ))
    .execute(wh.pool())
    .await
    .unwrap();
}

pub async fn insert_row_sample(wh: &Warehouse, id: &str, ts: i64, name: &str, value: Option<&str>) {
    sqlx::query(&format!(
        "INSERT INTO {ROW_TABLE} (\"Id\", \"timestamp\", udc_config_name, udc_config_value, region)
         VALUES ($1, $2, $3, $4, 'north')"
    ))
    .bind(id)
    .bind(ts)
    .bind(name)
    .bind(value.map(str::to_string))
    .execute(wh.pool())
    .await
    .unwrap();
}

pub async fn insert_column_sample(wh: &Warehouse, id: &str, ts: i64, dl: Option<&str>, region: &str) {
    sqlx::query(&format!(
        "INSERT INTO {COLUMN_TABLE} (\"Id\", \"timestamp\", dl_prb_util, ul_prb_util, region)
         VALUES ($1, $2, $3, NULL, $4)"
    ))
    .bind(id)
    .bind(ts)
    .bind(dl.map(str::to_string))
    .bind(region)
    .execute(wh.pool())
    .await
    .unwrap();
}

pub fn job(name: &str, event: &str) -> Job {
    Job {
        name: name.into(),
        job_type: "batch".into(),
        event_name: event.into(),
        enabled: true,
        created_at: 0,
        updated_at: 0,
    }
}

pub fn definition(granularity: &str, delay: i64) -> JobDefinition {
    JobDefinition {
        focal_entity: Some("NRCELL".into()),
        focal_type: Some("cell".into()),
        resource_filter: None,
        granularity: granularity.into(),
        delay,
        timezone: None,
        start_time: None,
        end_time: None,
        job_sub_type: None,
    }
}

pub fn metric(name: &str, aggs: &[&str]) -> JobMetric {
    JobMetric {
        metric_name: name.into(),
        entity: "NRCELL".into(),
        aggregation_types: aggs.iter().map(|s| s.to_string()).collect(),
    }
}

pub async fn register(wh: &Warehouse, name: &str, event: &str, metrics: &[JobMetric]) {
    wh.register_job(&job(name, event), &definition("1-hour", 1), metrics)
        .await
        .unwrap();
}
