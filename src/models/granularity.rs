// Aggregation bucket width: "<amount>-<unit>", e.g. "1-hour", "15-minute", "1-week".

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const MINUTES_PER_DAY: u32 = 24 * 60;
const HOURS_PER_DAY: u32 = 24;
/// Ten years; longer buckets are not a rollup.
const MAX_DAYS: u32 = 3660;
const MAX_WEEKS: u32 = 522;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranularityUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl GranularityUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            GranularityUnit::Minute => "minute",
            GranularityUnit::Hour => "hour",
            GranularityUnit::Day => "day",
            GranularityUnit::Week => "week",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "minute" | "minutes" | "min" => Some(GranularityUnit::Minute),
            "hour" | "hours" => Some(GranularityUnit::Hour),
            "day" | "days" => Some(GranularityUnit::Day),
            "week" | "weeks" => Some(GranularityUnit::Week),
            _ => None,
        }
    }
}

/// Fixed-duration bucket. Minute amounts divide a day and hour amounts divide 24 so
/// that buckets tile the local day without a ragged last bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Granularity {
    amount: u32,
    unit: GranularityUnit,
}

impl Granularity {
    pub fn new(amount: u32, unit: GranularityUnit) -> Result<Self, ConfigError> {
        let reject = |reason: &str| ConfigError::InvalidGranularity {
            value: format!("{}-{}", amount, unit.as_str()),
            reason: reason.to_string(),
        };
        if amount == 0 {
            return Err(reject("amount must be >= 1"));
        }
        match unit {
            GranularityUnit::Minute if MINUTES_PER_DAY % amount != 0 => {
                Err(reject("minute amount must divide 1440"))
            }
            GranularityUnit::Hour if HOURS_PER_DAY % amount != 0 => {
                Err(reject("hour amount must divide 24"))
            }
            GranularityUnit::Day if amount > MAX_DAYS => {
                Err(reject("day amount must be <= 3660"))
            }
            GranularityUnit::Week if amount > MAX_WEEKS => {
                Err(reject("week amount must be <= 522"))
            }
            _ => Ok(Self { amount, unit }),
        }
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn unit(&self) -> GranularityUnit {
        self.unit
    }

    pub fn duration(&self) -> TimeDelta {
        let n = self.amount as i64;
        match self.unit {
            GranularityUnit::Minute => TimeDelta::minutes(n),
            GranularityUnit::Hour => TimeDelta::hours(n),
            GranularityUnit::Day => TimeDelta::days(n),
            GranularityUnit::Week => TimeDelta::weeks(n),
        }
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidGranularity {
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let normalized = s.trim().to_ascii_lowercase();
        let Some((amount, unit)) = normalized.split_once('-') else {
            return Err(invalid("expected <amount>-<unit>"));
        };
        let amount: u32 = amount
            .trim()
            .parse()
            .map_err(|_| invalid("amount is not a positive integer"))?;
        let Some(unit) = GranularityUnit::parse(unit.trim()) else {
            return Err(invalid("unit must be minute, hour, day or week"));
        };
        Granularity::new(amount, unit).map_err(|e| match e {
            ConfigError::InvalidGranularity { reason, .. } => invalid(&reason),
            other => other,
        })
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.amount, self.unit.as_str())
    }
}
