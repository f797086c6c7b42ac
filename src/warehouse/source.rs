// Raw metric fetch. Two storage shapes behind one MetricSource capability:
//   row    - metric identity in a name column, payload in a generic value column
//   column - one column per metric, the column name is the normalized metric name
// The shape is chosen once per (metric, table) from the mapping; the SQL is built and its
// identifiers validated at that point, so fetches only bind the window.
// Values are read as text and coerced in Rust; anything non-numeric is excluded.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument};

use crate::aggregation::coerce_value;
use crate::error::{BatchResult, ConfigError};
use crate::models::{
    DEFAULT_NAME_COLUMN, DEFAULT_VALUE_COLUMN, ExecutionWindow, MetricTableMapping,
    ResourceFilter, StorageLayout, quote_identifier,
};

/// One usable raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub entity: String,
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub samples: Vec<RawSample>,
    /// Rows whose value was NULL or failed numeric coercion.
    pub excluded: usize,
}

impl FetchOutcome {
    pub fn extend(&mut self, other: FetchOutcome) {
        self.samples.extend(other.samples);
        self.excluded += other.excluded;
    }
}

pub trait MetricSource: Send + Sync {
    fn layout(&self) -> StorageLayout;

    fn table(&self) -> &str;

    /// Samples with `window.start <= ts < window.end`, ascending by timestamp.
    fn fetch_raw<'a>(
        &'a self,
        pool: &'a AnyPool,
        window: &'a ExecutionWindow,
    ) -> BoxFuture<'a, BatchResult<FetchOutcome>>;
}

/// Prepared statement text plus the binds that precede the window bounds.
#[derive(Debug, Clone)]
struct PreparedFetch {
    table: String,
    sql: String,
    /// Bound before the window bounds (row layout: the metric name).
    leading: Vec<String>,
    /// Bound after the window bounds.
    filter_binds: Vec<String>,
    has_entity_column: bool,
    /// Entity key used when the table has no entity column.
    fallback_entity: String,
}

#[derive(Debug, Clone)]
pub struct RowSource {
    prepared: PreparedFetch,
}

#[derive(Debug, Clone)]
pub struct ColumnSource {
    prepared: PreparedFetch,
}

impl RowSource {
    pub fn new(
        mapping: &MetricTableMapping,
        metric: &str,
        entity: &str,
        filter: &ResourceFilter,
    ) -> Result<Self, ConfigError> {
        let table = quote_identifier(&mapping.table_name)?;
        let ts = quote_identifier(&mapping.timestamp_column)?;
        let name = quote_identifier(mapping.name_column.as_deref().unwrap_or(DEFAULT_NAME_COLUMN))?;
        let value =
            quote_identifier(mapping.value_column.as_deref().unwrap_or(DEFAULT_VALUE_COLUMN))?;
        let entity_select = entity_select(mapping)?;
        let (filter_sql, filter_binds) = filter.to_sql(4)?;
        let sql = format!(
            "SELECT {entity_select}CAST({ts} AS BIGINT) AS ts, CAST({value} AS TEXT) AS value
             FROM {table}
             WHERE REPLACE(LOWER({name}), '.', '_') = $1 AND {ts} >= $2 AND {ts} < $3{filter_sql}
             ORDER BY {ts}"
        );
        Ok(Self {
            prepared: PreparedFetch {
                table: mapping.table_name.clone(),
                sql,
                leading: vec![metric.to_string()],
                filter_binds,
                has_entity_column: mapping.entity_column.is_some(),
                fallback_entity: entity.to_string(),
            },
        })
    }
}

impl ColumnSource {
    pub fn new(
        mapping: &MetricTableMapping,
        metric: &str,
        entity: &str,
        filter: &ResourceFilter,
    ) -> Result<Self, ConfigError> {
        let table = quote_identifier(&mapping.table_name)?;
        let ts = quote_identifier(&mapping.timestamp_column)?;
        let column = quote_identifier(metric)?;
        let entity_select = entity_select(mapping)?;
        let (filter_sql, filter_binds) = filter.to_sql(3)?;
        let sql = format!(
            "SELECT {entity_select}CAST({ts} AS BIGINT) AS ts, CAST({column} AS TEXT) AS value
             FROM {table}
             WHERE {ts} >= $1 AND {ts} < $2{filter_sql}
             ORDER BY {ts}"
        );
        Ok(Self {
            prepared: PreparedFetch {
                table: mapping.table_name.clone(),
                sql,
                leading: Vec::new(),
                filter_binds,
                has_entity_column: mapping.entity_column.is_some(),
                fallback_entity: entity.to_string(),
            },
        })
    }
}

fn entity_select(mapping: &MetricTableMapping) -> Result<String, ConfigError> {
    Ok(match &mapping.entity_column {
        Some(col) => format!("CAST({} AS TEXT) AS entity, ", quote_identifier(col)?),
        None => String::new(),
    })
}

impl MetricSource for RowSource {
    fn layout(&self) -> StorageLayout {
        StorageLayout::Row
    }

    fn table(&self) -> &str {
        &self.prepared.table
    }

    fn fetch_raw<'a>(
        &'a self,
        pool: &'a AnyPool,
        window: &'a ExecutionWindow,
    ) -> BoxFuture<'a, BatchResult<FetchOutcome>> {
        run_fetch(&self.prepared, pool, window).boxed()
    }
}

impl MetricSource for ColumnSource {
    fn layout(&self) -> StorageLayout {
        StorageLayout::Column
    }

    fn table(&self) -> &str {
        &self.prepared.table
    }

    fn fetch_raw<'a>(
        &'a self,
        pool: &'a AnyPool,
        window: &'a ExecutionWindow,
    ) -> BoxFuture<'a, BatchResult<FetchOutcome>> {
        run_fetch(&self.prepared, pool, window).boxed()
    }
}

/// Picks the implementation for one mapping.
pub fn select_source(
    mapping: &MetricTableMapping,
    metric: &str,
    entity: &str,
    filter: &ResourceFilter,
) -> Result<Box<dyn MetricSource>, ConfigError> {
    Ok(match mapping.layout {
        StorageLayout::Row => Box::new(RowSource::new(mapping, metric, entity, filter)?),
        StorageLayout::Column => Box::new(ColumnSource::new(mapping, metric, entity, filter)?),
    })
}

#[instrument(
    skip_all,
    fields(repo = "warehouse", operation = "fetch_raw", table = %prepared.table)
)]
async fn run_fetch(
    prepared: &PreparedFetch,
    pool: &AnyPool,
    window: &ExecutionWindow,
) -> BatchResult<FetchOutcome> {
    let mut query = sqlx::query(&prepared.sql);
    for v in &prepared.leading {
        query = query.bind(v.as_str());
    }
    query = query.bind(window.start_ms()).bind(window.end_ms());
    for v in &prepared.filter_binds {
        query = query.bind(v.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = FetchOutcome {
        samples: Vec::with_capacity(rows.len()),
        excluded: 0,
    };
    for row in &rows {
        let raw: Option<String> = row.try_get("value")?;
        let Some(value) = raw.as_deref().and_then(coerce_value) else {
            out.excluded += 1;
            continue;
        };
        let entity = if prepared.has_entity_column {
            let e: Option<String> = row.try_get("entity")?;
            e.unwrap_or_else(|| prepared.fallback_entity.clone())
        } else {
            prepared.fallback_entity.clone()
        };
        out.samples.push(RawSample {
            entity,
            timestamp_ms: row.try_get("ts")?,
            value,
        });
    }
    if out.excluded > 0 {
        debug!(excluded = out.excluded, "non-numeric values excluded");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_source_binds_name_then_window_then_filter() {
        let mapping = MetricTableMapping::row("dl_prb_util", "ruleexecutionresults")
            .with_entity_column("Id");
        let filter = ResourceFilter::parse("region = 'north'").unwrap();
        let src = RowSource::new(&mapping, "dl_prb_util", "NRCELL", &filter).unwrap();
        let sql = &src.prepared.sql;
        assert!(sql.contains("CAST(\"Id\" AS TEXT) AS entity"));
        assert!(sql.contains("REPLACE(LOWER(\"udc_config_name\"), '.', '_') = $1"));
        assert!(sql.contains("\"timestamp\" >= $2 AND \"timestamp\" < $3"));
        assert!(sql.contains("CAST(\"region\" AS TEXT) = $4"));
        assert_eq!(src.prepared.leading, vec!["dl_prb_util"]);
        assert_eq!(src.prepared.filter_binds, vec!["north"]);
    }

    #[test]
    fn column_source_uses_metric_as_column() {
        let mapping = MetricTableMapping::column("rrc_conn_avg", "nrcell_kpi");
        let src = ColumnSource::new(&mapping, "rrc_conn_avg", "NRCELL", &ResourceFilter::default())
            .unwrap();
        assert!(src.prepared.sql.contains("CAST(\"rrc_conn_avg\" AS TEXT) AS value"));
        assert!(src.prepared.sql.contains("FROM \"nrcell_kpi\""));
        assert!(!src.prepared.has_entity_column);
    }

    #[test]
    fn unsafe_names_are_rejected_before_any_query() {
        let mapping = MetricTableMapping::column("x", "kpi; drop table kpi");
        assert!(select_source(&mapping, "x", "E", &ResourceFilter::default()).is_err());
        let mapping = MetricTableMapping::column("x", "kpi");
        assert!(matches!(
            select_source(&mapping, "bad-metric", "E", &ResourceFilter::default()),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }
}
