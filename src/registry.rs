// Job registry: stored job rows -> validated, runnable job specs.
// A config error rejects one job (logged, reported) without touching the others; an
// unsupported aggregation identifier drops only that metric row.

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::aggregation::AggregationType;
use crate::error::{BatchResult, ConfigError};
use crate::models::{Granularity, Job, JobMetric, JobRows, ResourceFilter, normalize_metric_name};
use crate::schedule::{ActiveBounds, EventSchedule, resolve_event};
use crate::warehouse::Warehouse;
use crate::window::compute_window;

/// Keeps `delay * granularity` well inside chrono's range.
const MAX_DELAY: i64 = 10_000;

#[derive(Debug, Clone)]
pub struct MetricSpec {
    /// Normalized (`dl_prb_util`); used for mapping lookup and row-layout matching.
    pub name: String,
    pub configured_name: String,
    pub entity: String,
    pub aggregations: Vec<AggregationType>,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job: Job,
    pub schedule: EventSchedule,
    pub granularity: Granularity,
    pub delay: u32,
    pub timezone: Tz,
    pub filter: ResourceFilter,
    pub bounds: ActiveBounds,
    pub focal_entity: Option<String>,
    pub metrics: Vec<MetricSpec>,
    /// Metric rows dropped at load, with the reason.
    pub skipped_metrics: Vec<(String, ConfigError)>,
}

impl JobSpec {
    pub fn name(&self) -> &str {
        &self.job.name
    }
}

#[derive(Debug, Clone)]
pub struct RejectedJob {
    pub job_name: String,
    pub error: ConfigError,
}

#[derive(Debug, Default)]
pub struct RegistryLoad {
    pub jobs: Vec<JobSpec>,
    pub rejected: Vec<RejectedJob>,
}

/// Validates one job. Only whole-job problems return `Err`.
pub fn compile(rows: JobRows, default_tz: Tz) -> Result<JobSpec, ConfigError> {
    let JobRows {
        job,
        definition,
        metrics,
        unreadable,
        unreadable_metrics,
    } = rows;
    if let Some(e) = unreadable {
        return Err(e);
    }
    let definition = definition.ok_or_else(|| ConfigError::MissingDefinition(job.name.clone()))?;

    let timezone = match definition.timezone.as_deref().map(str::trim) {
        None | Some("") => default_tz,
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))?,
    };
    let schedule = resolve_event(&job.event_name, timezone)?;
    let granularity: Granularity = definition.granularity.parse()?;
    if definition.delay < 0 {
        return Err(ConfigError::NegativeDelay(definition.delay));
    }
    if definition.delay > MAX_DELAY {
        return Err(ConfigError::DelayTooLarge(definition.delay));
    }
    let delay = definition.delay as u32;
    compute_window(&granularity, delay, Utc::now(), timezone)?;
    let filter = ResourceFilter::parse(definition.resource_filter.as_deref().unwrap_or(""))?;

    let mut compiled = Vec::with_capacity(metrics.len());
    let mut skipped_metrics = Vec::new();
    for (metric, e) in unreadable_metrics {
        error!(job = %job.name, metric = %metric, error = %e, "metric skipped: unreadable row");
        skipped_metrics.push((metric, e));
    }
    for metric in metrics {
        match compile_metric(&metric) {
            Ok(m) => compiled.push(m),
            Err(e) => {
                error!(
                    job = %job.name,
                    metric = %metric.metric_name,
                    error = %e,
                    "metric skipped: invalid configuration"
                );
                skipped_metrics.push((metric.metric_name.clone(), e));
            }
        }
    }

    Ok(JobSpec {
        schedule,
        granularity,
        delay,
        timezone,
        filter,
        bounds: ActiveBounds {
            start_ms: definition.start_time,
            end_ms: definition.end_time,
        },
        focal_entity: definition.focal_entity,
        metrics: compiled,
        skipped_metrics,
        job,
    })
}

fn compile_metric(metric: &JobMetric) -> Result<MetricSpec, ConfigError> {
    let mut aggregations: Vec<AggregationType> = Vec::new();
    for id in &metric.aggregation_types {
        let kind: AggregationType = id.parse()?;
        if !aggregations.contains(&kind) {
            aggregations.push(kind);
        }
    }
    Ok(MetricSpec {
        name: normalize_metric_name(&metric.metric_name),
        configured_name: metric.metric_name.clone(),
        entity: metric.entity.clone(),
        aggregations,
    })
}

/// Loads and compiles every enabled job.
pub async fn load(warehouse: &Warehouse, default_tz: Tz) -> BatchResult<RegistryLoad> {
    let rows = warehouse.load_enabled_jobs().await?;
    let mut out = RegistryLoad::default();
    for r in rows {
        let job_name = r.job.name.clone();
        match compile(r, default_tz) {
            Ok(spec) => {
                if spec.metrics.is_empty() {
                    warn!(job = %job_name, "job has no runnable metrics");
                }
                out.jobs.push(spec);
            }
            Err(e) => {
                error!(job = %job_name, error = %e, "job rejected: invalid configuration");
                out.rejected.push(RejectedJob { job_name, error: e });
            }
        }
    }
    info!(
        jobs = out.jobs.len(),
        rejected = out.rejected.len(),
        "job registry loaded"
    );
    Ok(out)
}
