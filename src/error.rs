// Error taxonomy for the batch engine: configuration, data, infrastructure.
// Config errors fail one job definition at load; data errors skip the smallest unit
// (value, metric); infrastructure errors are retried, then fail the run.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown event name {0:?}")]
    UnknownEvent(String),
    #[error("invalid granularity {value:?}: {reason}")]
    InvalidGranularity { value: String, reason: String },
    #[error("job delay must be >= 0, got {0}")]
    NegativeDelay(i64),
    #[error("job delay {0} is too large")]
    DelayTooLarge(i64),
    #[error("job {0:?} has no definition row")]
    MissingDefinition(String),
    #[error("unsupported aggregation type {0:?}")]
    UnsupportedAggregation(String),
    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),
    #[error("invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("invalid resource filter {filter:?}: {reason}")]
    InvalidResourceFilter { filter: String, reason: String },
    #[error("invalid storage layout {0:?} (expected \"row\" or \"column\")")]
    InvalidLayout(String),
    #[error("invalid cron expression for event {event:?}: {reason}")]
    InvalidSchedule { event: String, reason: String },
    #[error("window for granularity {granularity} with delay {delay} is outside the representable time range")]
    WindowOutOfRange { granularity: String, delay: u32 },
    #[error("stored {table} row could not be read: {reason}")]
    UnreadableRow { table: &'static str, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("no table mapping for metric {metric:?}")]
    MissingMapping { metric: String },
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{step} timed out after {secs}s")]
    Timeout { step: &'static str, secs: u64 },
}

impl BatchError {
    /// Infrastructure failures worth another attempt. Decode/column errors are schema
    /// problems and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            BatchError::Timeout { .. } => true,
            BatchError::Database(e) => !matches!(
                e,
                sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnIndexOutOfBounds { .. }
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::RowNotFound
                    | sqlx::Error::Configuration(_)
            ),
            BatchError::Config(_) | BatchError::Data(_) => false,
        }
    }

    /// Short category label for logs and run state.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::Config(_) => "config",
            BatchError::Data(_) => "data",
            BatchError::Database(_) | BatchError::Timeout { .. } => "infrastructure",
        }
    }
}

pub type BatchResult<T> = Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_io_are_retryable() {
        let t = BatchError::Timeout {
            step: "fetch",
            secs: 5,
        };
        assert!(t.is_retryable());
        assert_eq!(t.kind(), "infrastructure");
        let pool = BatchError::Database(sqlx::Error::PoolTimedOut);
        assert!(pool.is_retryable());
    }

    #[test]
    fn config_and_decode_errors_are_not_retryable() {
        let c = BatchError::from(ConfigError::UnknownEvent("EVERYFORTNIGHT".into()));
        assert!(!c.is_retryable());
        assert_eq!(c.kind(), "config");
        assert!(c.to_string().contains("EVERYFORTNIGHT"));
        let d = BatchError::Database(sqlx::Error::ColumnNotFound("x".into()));
        assert!(!d.is_retryable());
    }
}
