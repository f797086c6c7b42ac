// Execution window and persisted aggregation output.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Granularity;

/// One concrete [start, end) bucket computed for a run. Not persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
}

impl ExecutionWindow {
    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// One aggregate value for (job, metric, entity, window start, aggregation type).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub job_name: String,
    pub metric_name: String,
    pub entity: String,
    pub window_start: i64,
    pub window_end: i64,
    pub granularity: String,
    pub aggregation_type: String,
    /// Downstream alarm-rule name, e.g. `tsum_hour_dl_prb_util`.
    pub result_name: String,
    pub value: f64,
    pub created_at: i64,
}
