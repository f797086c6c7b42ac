// Window calculator: granularity + delay + reference time -> [start, end).
//
// Boundaries are found on the job's local clock (so "1-day" in Europe/Berlin starts at
// Berlin midnight), then shifted by fixed durations, so end - start is always exactly
// the granularity duration.
//
// The reference time falls inside the bucket [t, t + g) with t = truncate(reference).
// delay = 0 selects that (still filling) bucket; each delay unit steps one bucket back:
//   end = truncate(reference) + g - delay * g,  start = end - g
// EVERYHOUR firing at 10:00 with "1-hour", delay 1 therefore rolls up [09:00, 10:00).

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::ConfigError;
use crate::models::{ExecutionWindow, Granularity, GranularityUnit};

/// 1970-01-01 as counted by `num_days_from_ce`.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;
/// 1970-01-05 was the first Monday after the epoch.
const FIRST_MONDAY_EPOCH_DAY: i64 = 4;
/// Upper bound on windows produced by one `windows_between` call.
pub const MAX_BACKFILL_WINDOWS: usize = 100_000;

pub fn compute_window(
    granularity: &Granularity,
    delay: u32,
    reference: DateTime<Utc>,
    tz: Tz,
) -> Result<ExecutionWindow, ConfigError> {
    let out_of_range = || out_of_range(granularity, delay);
    let g = granularity.duration();
    let back = i32::try_from(delay)
        .ok()
        .and_then(|d| g.checked_mul(d))
        .ok_or_else(out_of_range)?;
    let end = truncate(granularity, reference, tz)?
        .checked_add_signed(g)
        .and_then(|t| t.checked_sub_signed(back))
        .ok_or_else(out_of_range)?;
    Ok(ExecutionWindow {
        start: end.checked_sub_signed(g).ok_or_else(out_of_range)?,
        end,
        granularity: *granularity,
    })
}

fn out_of_range(granularity: &Granularity, delay: u32) -> ConfigError {
    ConfigError::WindowOutOfRange {
        granularity: granularity.to_string(),
        delay,
    }
}

/// Latest bucket boundary at or before `reference`, on the local clock of `tz`.
pub fn truncate(
    granularity: &Granularity,
    reference: DateTime<Utc>,
    tz: Tz,
) -> Result<DateTime<Utc>, ConfigError> {
    let local = reference.with_timezone(&tz).naive_local();
    let date = local.date();
    let midnight = date.and_time(NaiveTime::MIN);
    let amount = granularity.amount() as i64;

    let boundary = match granularity.unit() {
        GranularityUnit::Minute => {
            let minutes = (local.hour() * 60 + local.minute()) as i64;
            Some(midnight + TimeDelta::minutes(minutes - minutes % amount))
        }
        GranularityUnit::Hour => {
            let hour = local.hour() as i64;
            Some(midnight + TimeDelta::hours(hour - hour % amount))
        }
        GranularityUnit::Day => {
            let epoch_day = date.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE;
            midnight.checked_sub_signed(TimeDelta::days(epoch_day.rem_euclid(amount)))
        }
        GranularityUnit::Week => {
            let to_monday = date.weekday().num_days_from_monday() as i64;
            let monday_epoch_day =
                date.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE - to_monday;
            let week_index = (monday_epoch_day - FIRST_MONDAY_EPOCH_DAY).div_euclid(7);
            midnight.checked_sub_signed(TimeDelta::days(to_monday + 7 * week_index.rem_euclid(amount)))
        }
    };

    boundary
        .map(|b| resolve_local(tz, b))
        .ok_or_else(|| out_of_range(granularity, 0))
}

/// Every window (delay 0) whose end boundary lies in (from, to], oldest first.
pub fn windows_between(
    granularity: &Granularity,
    tz: Tz,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ExecutionWindow>, ConfigError> {
    let out_of_range = || out_of_range(granularity, 0);
    let g = granularity.duration();
    let mut out = Vec::new();
    let mut end = truncate(granularity, to, tz)?;
    while end > from && out.len() < MAX_BACKFILL_WINDOWS {
        out.push(ExecutionWindow {
            start: end.checked_sub_signed(g).ok_or_else(out_of_range)?,
            end,
            granularity: *granularity,
        });
        let before = end
            .checked_sub_signed(TimeDelta::milliseconds(1))
            .ok_or_else(out_of_range)?;
        end = truncate(granularity, before, tz)?;
    }
    out.reverse();
    Ok(out)
}

/// Local wall-clock time to UTC. Ambiguous times take the earlier instant; times in a
/// DST gap move to the first valid instant after the gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt.with_timezone(&Utc);
    }
    let shifted = naive.checked_add_signed(TimeDelta::hours(1)).unwrap_or(naive);
    let shifted = shifted.date().and_hms_opt(shifted.hour(), 0, 0).unwrap_or(shifted);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
