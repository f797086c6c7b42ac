// Metric-to-table mapping (metricsandtables) and identifier hygiene for dynamic SQL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Postgres truncates identifiers past this length.
const MAX_IDENTIFIER_LEN: usize = 63;

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";
pub const DEFAULT_NAME_COLUMN: &str = "udc_config_name";
pub const DEFAULT_VALUE_COLUMN: &str = "udc_config_value";

/// How a raw table stores metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    /// Metric identity in a name column, payload in a generic value column.
    Row,
    /// One column per metric; the metric name is the column name.
    Column,
}

impl StorageLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageLayout::Row => "row",
            StorageLayout::Column => "column",
        }
    }
}

impl FromStr for StorageLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "row" | "rows" => Ok(StorageLayout::Row),
            "column" | "columns" => Ok(StorageLayout::Column),
            _ => Err(ConfigError::InvalidLayout(s.to_string())),
        }
    }
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTableMapping {
    pub metric_name: String,
    pub table_name: String,
    pub layout: StorageLayout,
    /// Column holding the entity instance key; `None` aggregates the whole table under
    /// the job metric's entity.
    pub entity_column: Option<String>,
    pub timestamp_column: String,
    /// Row layout only.
    pub name_column: Option<String>,
    /// Row layout only.
    pub value_column: Option<String>,
}

impl MetricTableMapping {
    pub fn column(metric_name: &str, table_name: &str) -> Self {
        Self {
            metric_name: normalize_metric_name(metric_name),
            table_name: table_name.to_string(),
            layout: StorageLayout::Column,
            entity_column: None,
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            name_column: None,
            value_column: None,
        }
    }

    pub fn row(metric_name: &str, table_name: &str) -> Self {
        Self {
            layout: StorageLayout::Row,
            name_column: Some(DEFAULT_NAME_COLUMN.to_string()),
            value_column: Some(DEFAULT_VALUE_COLUMN.to_string()),
            ..Self::column(metric_name, table_name)
        }
    }

    pub fn with_entity_column(mut self, column: &str) -> Self {
        self.entity_column = Some(column.to_string());
        self
    }
}

/// Configured metric names and row-layout name values are compared after this:
/// trimmed, lower-cased, dots to underscores (`DL.PRB.Util` -> `dl_prb_util`).
pub fn normalize_metric_name(name: &str) -> String {
    name.trim().to_lowercase().replace('.', "_")
}

/// Validates a table/column name and returns it double-quoted for splicing into SQL.
/// Only `[A-Za-z_][A-Za-z0-9_]*` is accepted, so quoting can never be escaped.
pub fn quote_identifier(name: &str) -> Result<String, ConfigError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}
