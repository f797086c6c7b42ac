// Numeric aggregation over one (metric, entity, window) group.
// Aggregation types are a closed set registered once in AGGREGATIONS; the identifier
// lookup and the function dispatch both go through that table.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Median,
    Std,
    Var,
}

type AggregateFn = fn(&[f64]) -> f64;

struct Registration {
    kind: AggregationType,
    name: &'static str,
    apply: AggregateFn,
}

/// Ordered by enum discriminant so `kind as usize` indexes it.
const AGGREGATIONS: &[Registration] = &[
    Registration {
        kind: AggregationType::Sum,
        name: "sum",
        apply: sum,
    },
    Registration {
        kind: AggregationType::Avg,
        name: "avg",
        apply: mean,
    },
    Registration {
        kind: AggregationType::Count,
        name: "count",
        apply: count,
    },
    Registration {
        kind: AggregationType::Min,
        name: "min",
        apply: min,
    },
    Registration {
        kind: AggregationType::Max,
        name: "max",
        apply: max,
    },
    Registration {
        kind: AggregationType::Median,
        name: "median",
        apply: median,
    },
    Registration {
        kind: AggregationType::Std,
        name: "std",
        apply: std_dev,
    },
    Registration {
        kind: AggregationType::Var,
        name: "var",
        apply: variance,
    },
];

impl AggregationType {
    pub fn all() -> impl Iterator<Item = AggregationType> {
        AGGREGATIONS.iter().map(|r| r.kind)
    }

    pub fn as_str(self) -> &'static str {
        registration(self).name
    }
}

fn registration(kind: AggregationType) -> &'static Registration {
    &AGGREGATIONS[kind as usize]
}

impl FromStr for AggregationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AGGREGATIONS
            .iter()
            .find(|r| r.name == wanted)
            .map(|r| r.kind)
            .ok_or_else(|| ConfigError::UnsupportedAggregation(s.to_string()))
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies `kind` to the finite values in `values`. `None` when nothing finite is left.
pub fn aggregate(values: &[f64], kind: AggregationType) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some((registration(kind).apply)(&finite))
}

/// Numeric coercion for raw warehouse values. Text that does not parse, and NaN/inf,
/// is excluded rather than read as zero.
pub fn coerce_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn sum(v: &[f64]) -> f64 {
    v.iter().sum()
}

fn count(v: &[f64]) -> f64 {
    v.len() as f64
}

fn mean(v: &[f64]) -> f64 {
    sum(v) / (v.len() as f64)
}

fn min(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Even counts interpolate halfway between the two middle ranks.
fn median(v: &[f64]) -> f64 {
    let mut sorted = v.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population variance (divides by n).
fn variance(v: &[f64]) -> f64 {
    let m = mean(v);
    v.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (v.len() as f64)
}

fn std_dev(v: &[f64]) -> f64 {
    variance(v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_indexed_by_discriminant() {
        for (i, r) in AGGREGATIONS.iter().enumerate() {
            assert_eq!(r.kind as usize, i, "{} out of order", r.name);
        }
        assert_eq!(AggregationType::all().count(), 8);
    }

    #[test]
    fn identifiers_round_trip_through_the_table() {
        for kind in AggregationType::all() {
            assert_eq!(kind.as_str().parse::<AggregationType>().unwrap(), kind);
        }
        assert_eq!(" AVG ".parse::<AggregationType>().unwrap(), AggregationType::Avg);
        assert_eq!(
            "stdev".parse::<AggregationType>().unwrap_err(),
            ConfigError::UnsupportedAggregation("stdev".into())
        );
    }

    #[test]
    fn coercion_excludes_text_and_non_finite() {
        assert_eq!(coerce_value(" 12.5 "), Some(12.5));
        assert_eq!(coerce_value("1e3"), Some(1000.0));
        assert_eq!(coerce_value("bad"), None);
        assert_eq!(coerce_value(""), None);
        assert_eq!(coerce_value("NaN"), None);
        assert_eq!(coerce_value("inf"), None);
    }

    #[test]
    fn non_finite_inputs_are_ignored() {
        let v = [1.0, f64::NAN, 3.0, f64::INFINITY];
        assert_eq!(aggregate(&v, AggregationType::Count), Some(2.0));
        assert_eq!(aggregate(&v, AggregationType::Avg), Some(2.0));
        assert_eq!(aggregate(&[f64::NAN], AggregationType::Sum), None);
    }
}
