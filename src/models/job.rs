// Job configuration rows as stored by operators (batch_jobs, batchjob_definitions, batchjob_metrics).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    pub job_type: String,
    pub event_name: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub focal_entity: Option<String>,
    pub focal_type: Option<String>,
    pub resource_filter: Option<String>,
    pub granularity: String,
    /// Look-back in whole granularity units.
    pub delay: i64,
    /// IANA zone name; `None` falls back to the scheduler default.
    pub timezone: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub job_sub_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetric {
    pub metric_name: String,
    pub entity: String,
    /// Identifiers as configured; validated when the job is compiled.
    pub aggregation_types: Vec<String>,
}

/// Everything stored for one job, as loaded from the warehouse.
#[derive(Debug, Clone)]
pub struct JobRows {
    pub job: Job,
    pub definition: Option<JobDefinition>,
    pub metrics: Vec<JobMetric>,
    /// Set when the job or definition row held values that could not be decoded.
    pub unreadable: Option<ConfigError>,
    /// Metric rows that could not be decoded, by metric name.
    pub unreadable_metrics: Vec<(String, ConfigError)>,
}

impl JobRows {
    /// Placeholder for a job whose stored row is known only by name.
    pub fn unreadable(name: String, error: ConfigError) -> Self {
        Self {
            job: Job {
                name,
                job_type: String::new(),
                event_name: String::new(),
                enabled: true,
                created_at: 0,
                updated_at: 0,
            },
            definition: None,
            metrics: Vec::new(),
            unreadable: Some(error),
            unreadable_metrics: Vec::new(),
        }
    }
}

/// Aggregation types are stored comma separated (`"sum,avg"`).
pub fn split_aggregation_types(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '{' || c == '}' || c == '"'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_comma_and_array_literals() {
        assert_eq!(split_aggregation_types("sum, avg,max"), vec!["sum", "avg", "max"]);
        assert_eq!(split_aggregation_types("{sum,\"min\"}"), vec!["sum", "min"]);
        assert!(split_aggregation_types(" , ").is_empty());
    }
}
