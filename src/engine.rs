// Batch engine: one dispatcher loop, one pass per tick.
//
// Each tick reloads the registry, asks every job's schedule whether it is due, and runs
// the due jobs through fetch -> aggregate -> write, at most `max_concurrent_jobs` at a
// time. A single job's steps run sequentially. Infrastructure steps are bounded by the
// job timeout and retried with backoff; a run that still fails is recorded as failed and
// its fire time is not advanced, so the next tick picks the same window up again.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::aggregation::aggregate;
use crate::error::{BatchError, BatchResult, DataError};
use crate::models::{AggregationResult, ExecutionWindow};
use crate::registry::{self, JobSpec, MetricSpec};
use crate::retry::{RetryPolicy, with_backoff};
use crate::schedule::Decision;
use crate::warehouse::Warehouse;
use crate::warehouse::source::{FetchOutcome, select_source};
use crate::window::compute_window;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub max_concurrent_jobs: usize,
    /// Rows per write transaction.
    pub batch_size: usize,
    /// Upper bound for one fetch or one batch write.
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
    /// Used when a job definition has no timezone.
    pub default_timezone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Rejected,
}

/// Latest outcome per job, as served by `/api/runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunStatus {
    pub job_name: String,
    pub outcome: RunOutcome,
    pub fire_time: Option<i64>,
    pub window_start: Option<i64>,
    pub window_end: Option<i64>,
    pub results_written: usize,
    pub metrics_skipped: usize,
    pub error: Option<String>,
    pub finished_at: i64,
}

pub type RunBoard = Arc<RwLock<BTreeMap<String, JobRunStatus>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub jobs_loaded: usize,
    pub rejected: usize,
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRunReport {
    pub job_name: String,
    pub window: ExecutionWindow,
    pub results_written: usize,
    pub metrics_computed: usize,
    /// Metrics dropped for this run (no mapping, unusable mapping) plus those dropped at load.
    pub metrics_skipped: usize,
    pub values_excluded: usize,
}

pub struct Engine {
    warehouse: Arc<Warehouse>,
    config: EngineConfig,
    board: RunBoard,
}

impl Engine {
    pub fn new(warehouse: Arc<Warehouse>, config: EngineConfig) -> Self {
        Self {
            warehouse,
            config,
            board: RunBoard::default(),
        }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn board(&self) -> RunBoard {
        self.board.clone()
    }

    /// One scheduler pass at `now`. Only a registry load failure is returned as `Err`;
    /// per-job failures are recorded and counted.
    pub async fn run_one_tick(&self, now: DateTime<Utc>) -> BatchResult<TickSummary> {
        let loaded = registry::load(&self.warehouse, self.config.default_timezone).await?;
        let mut summary = TickSummary {
            jobs_loaded: loaded.jobs.len(),
            rejected: loaded.rejected.len(),
            ..TickSummary::default()
        };

        {
            let mut board = self.board.write().await;
            for r in &loaded.rejected {
                board.insert(
                    r.job_name.clone(),
                    JobRunStatus {
                        job_name: r.job_name.clone(),
                        outcome: RunOutcome::Rejected,
                        fire_time: None,
                        window_start: None,
                        window_end: None,
                        results_written: 0,
                        metrics_skipped: 0,
                        error: Some(r.error.to_string()),
                        finished_at: now.timestamp_millis(),
                    },
                );
            }
        }

        let mut due = Vec::new();
        for spec in loaded.jobs {
            let last_fired = match self.warehouse.job_state(spec.name()).await {
                Ok(state) => state
                    .and_then(|s| s.last_fired_at)
                    .and_then(DateTime::<Utc>::from_timestamp_millis),
                Err(e) => {
                    error!(job = %spec.name(), error = %e, "job state read failed");
                    summary.failed += 1;
                    continue;
                }
            };
            match spec.schedule.decide(now, last_fired, spec.bounds) {
                Decision::Due { fire_time } => due.push((spec, fire_time)),
                Decision::NotDue { next_fire } => {
                    debug!(job = %spec.name(), next_fire = ?next_fire, "not due");
                }
            }
        }
        summary.due = due.len();

        let statuses: Vec<JobRunStatus> = stream::iter(due)
            .map(|(spec, fire_time)| async move { self.execute(&spec, fire_time, now).await })
            .buffer_unordered(self.config.max_concurrent_jobs.max(1))
            .collect()
            .await;

        let mut board = self.board.write().await;
        for status in statuses {
            match status.outcome {
                RunOutcome::Succeeded => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
            board.insert(status.job_name.clone(), status);
        }
        Ok(summary)
    }

    /// Runs a due job for the window derived from `fire_time` and records the outcome.
    async fn execute(&self, spec: &JobSpec, fire_time: DateTime<Utc>, now: DateTime<Utc>) -> JobRunStatus {
        let window = match compute_window(&spec.granularity, spec.delay, fire_time, spec.timezone) {
            Ok(window) => window,
            Err(e) => {
                let e = BatchError::from(e);
                error!(job = %spec.name(), kind = e.kind(), error = %e, "job window out of range");
                self.save_failure(spec.name(), &e, now).await;
                return JobRunStatus {
                    job_name: spec.name().to_string(),
                    outcome: RunOutcome::Failed,
                    fire_time: Some(fire_time.timestamp_millis()),
                    window_start: None,
                    window_end: None,
                    results_written: 0,
                    metrics_skipped: 0,
                    error: Some(e.to_string()),
                    finished_at: Utc::now().timestamp_millis(),
                };
            }
        };
        let span = info_span!(
            "job_run",
            job = %spec.name(),
            window_start = %window.start,
            window_end = %window.end
        );
        async move {
            let mut status = JobRunStatus {
                job_name: spec.name().to_string(),
                outcome: RunOutcome::Succeeded,
                fire_time: Some(fire_time.timestamp_millis()),
                window_start: Some(window.start_ms()),
                window_end: Some(window.end_ms()),
                results_written: 0,
                metrics_skipped: 0,
                error: None,
                finished_at: Utc::now().timestamp_millis(),
            };
            match self.run_job_window(spec, &window).await {
                Ok(report) => {
                    status.results_written = report.results_written;
                    status.metrics_skipped = report.metrics_skipped;
                    if let Err(e) = self
                        .warehouse
                        .record_success(spec.name(), fire_time.timestamp_millis(), now.timestamp_millis())
                        .await
                    {
                        error!(error = %e, "job run succeeded but its state was not saved");
                        status.outcome = RunOutcome::Failed;
                        status.error = Some(e.to_string());
                    } else {
                        info!(
                            results = report.results_written,
                            metrics = report.metrics_computed,
                            skipped = report.metrics_skipped,
                            excluded = report.values_excluded,
                            "job run complete"
                        );
                    }
                }
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "job run failed");
                    status.outcome = RunOutcome::Failed;
                    status.error = Some(e.to_string());
                    self.save_failure(spec.name(), &e, now).await;
                }
            }
            status.finished_at = Utc::now().timestamp_millis();
            status
        }
        .instrument(span)
        .await
    }

    /// Marks the run failed; `last_fired_at` stays where it was.
    async fn save_failure(&self, job_name: &str, e: &BatchError, now: DateTime<Utc>) {
        if let Err(se) = self
            .warehouse
            .record_failure(job_name, &e.to_string(), now.timestamp_millis())
            .await
        {
            error!(job = %job_name, error = %se, "failed to record job failure");
        }
    }

    /// Fetch, aggregate and write one window for one job. Metrics with data or mapping
    /// problems are skipped; an infrastructure error that survives its retries fails
    /// the whole run.
    pub async fn run_job_window(
        &self,
        spec: &JobSpec,
        window: &ExecutionWindow,
    ) -> BatchResult<JobRunReport> {
        let created_at = Utc::now().timestamp_millis();
        let mut report = JobRunReport {
            job_name: spec.name().to_string(),
            window: *window,
            results_written: 0,
            metrics_computed: 0,
            metrics_skipped: spec.skipped_metrics.len(),
            values_excluded: 0,
        };

        let mut results = Vec::new();
        for metric in &spec.metrics {
            let span = info_span!("metric", metric = %metric.name, entity = %metric.entity);
            match self
                .compute_metric(spec, metric, window, created_at)
                .instrument(span)
                .await
            {
                Ok((rows, excluded)) => {
                    report.metrics_computed += 1;
                    report.values_excluded += excluded;
                    results.extend(rows);
                }
                Err(e @ (BatchError::Data(_) | BatchError::Config(_))) => {
                    warn!(metric = %metric.name, kind = e.kind(), error = %e, "metric skipped");
                    report.metrics_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let policy = self.config.retry;
        let limit = self.config.job_timeout;
        for chunk in results.chunks(self.config.batch_size.max(1)) {
            report.results_written += with_backoff(policy, "write_batch", || {
                bounded("write_batch", limit, self.warehouse.write_batch(chunk))
            })
            .await?;
        }
        Ok(report)
    }

    /// Returns the metric's result rows and the number of excluded raw values.
    async fn compute_metric(
        &self,
        spec: &JobSpec,
        metric: &MetricSpec,
        window: &ExecutionWindow,
        created_at: i64,
    ) -> BatchResult<(Vec<AggregationResult>, usize)> {
        let policy = self.config.retry;
        let limit = self.config.job_timeout;

        let mappings = with_backoff(policy, "mappings_for", || {
            bounded("mappings_for", limit, self.warehouse.mappings_for(&metric.name))
        })
        .await?;
        if mappings.is_empty() {
            return Err(DataError::MissingMapping {
                metric: metric.configured_name.clone(),
            }
            .into());
        }

        let mut fetched = FetchOutcome::default();
        for mapping in &mappings {
            let source = select_source(mapping, &metric.name, &metric.entity, &spec.filter)?;
            let pool = self.warehouse.pool();
            let outcome = with_backoff(policy, "fetch_raw", || {
                bounded("fetch_raw", limit, source.fetch_raw(pool, window))
            })
            .await?;
            debug!(
                table = source.table(),
                layout = %source.layout(),
                samples = outcome.samples.len(),
                "fetched"
            );
            fetched.extend(outcome);
        }
        if fetched.excluded > 0 {
            warn!(excluded = fetched.excluded, "non-numeric values excluded from aggregation");
        }

        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for sample in fetched.samples {
            groups.entry(sample.entity).or_default().push(sample.value);
        }

        let unit = spec.granularity.unit().as_str();
        let granularity = spec.granularity.to_string();
        let mut rows = Vec::new();
        for (entity, values) in &groups {
            for kind in &metric.aggregations {
                let Some(value) = aggregate(values, *kind) else {
                    continue;
                };
                rows.push(AggregationResult {
                    job_name: spec.name().to_string(),
                    metric_name: metric.name.clone(),
                    entity: entity.clone(),
                    window_start: window.start_ms(),
                    window_end: window.end_ms(),
                    granularity: granularity.clone(),
                    aggregation_type: kind.as_str().to_string(),
                    result_name: result_name(kind.as_str(), unit, &metric.name),
                    value,
                    created_at,
                });
            }
        }
        Ok((rows, fetched.excluded))
    }
}

/// Downstream rule name, e.g. `tsum_hour_dl_prb_util`.
pub fn result_name(aggregation: &str, unit: &str, metric: &str) -> String {
    format!("t{}_{}_{}", aggregation, unit, metric)
}

async fn bounded<T>(
    step: &'static str,
    limit: Duration,
    fut: impl Future<Output = BatchResult<T>>,
) -> BatchResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(BatchError::Timeout {
            step,
            secs: limit.as_secs(),
        }),
    }
}

/// Spawns the scheduler loop. Runs one tick per `tick_interval` until `shutdown_rx` fires.
pub fn spawn(
    engine: Arc<Engine>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(engine.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = engine.config.tick_interval.as_secs(),
            max_concurrent_jobs = engine.config.max_concurrent_jobs,
            "scheduler started"
        );
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match engine.run_one_tick(Utc::now()).await {
                        Ok(s) if s.due > 0 => info!(
                            due = s.due,
                            succeeded = s.succeeded,
                            failed = s.failed,
                            rejected = s.rejected,
                            "tick complete"
                        ),
                        Ok(s) => debug!(jobs = s.jobs_loaded, "tick complete, nothing due"),
                        Err(e) => warn!(error = %e, "tick failed: job registry unavailable"),
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_names_follow_rule_convention() {
        assert_eq!(result_name("sum", "hour", "dl_prb_util"), "tsum_hour_dl_prb_util");
        assert_eq!(result_name("median", "minute", "x"), "tmedian_minute_x");
    }

    #[tokio::test]
    async fn bounded_step_times_out_as_retryable() {
        let res: BatchResult<()> = bounded("fetch_raw", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = res.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("fetch_raw"));
    }
}
