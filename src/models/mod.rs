// Domain models for the batch engine

mod aggregation;
mod filter;
mod granularity;
mod job;
mod mapping;

pub use aggregation::{AggregationResult, ExecutionWindow};
pub use filter::{Predicate, ResourceFilter};
pub use granularity::{Granularity, GranularityUnit};
pub use job::{Job, JobDefinition, JobMetric, JobRows, split_aggregation_types};
pub use mapping::{
    DEFAULT_NAME_COLUMN, DEFAULT_TIMESTAMP_COLUMN, DEFAULT_VALUE_COLUMN, MetricTableMapping,
    StorageLayout, normalize_metric_name, quote_identifier,
};
