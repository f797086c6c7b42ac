// Schedule resolver: event name -> recurrence rule -> "is this job due now?".
//
// Named events map to six-field cron expressions (sec min hour dom month dow), evaluated
// in the job's timezone. EVERYDAY{H}{AM|PM}{ZONE} carries its own zone.
// The canonical fire time is the latest scheduled instant <= now; a job is due when its
// persisted last fire is older than that, so two checks inside one tick fire once.

use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::ConfigError;

const EVENT_CATALOGUE: &[(&str, &str)] = &[
    ("EVERYMINUTE", "0 * * * * *"),
    ("EVERY5MINUTES", "0 */5 * * * *"),
    ("EVERY10MINUTES", "0 */10 * * * *"),
    ("EVERY15MINUTES", "0 */15 * * * *"),
    ("EVERY30MINUTES", "0 */30 * * * *"),
    ("EVERYHOUR", "0 0 * * * *"),
    ("EVERYHOURBYMIN10", "0 10 * * * *"),
    ("EVERYDAY", "0 0 0 * * *"),
    ("EVERYWEEK", "0 0 0 * * Mon"),
    ("EVERYMONTH", "0 0 0 1 * *"),
];

/// Zone suffixes accepted by EVERYDAY{H}{AM|PM}{ZONE}.
const ZONE_ABBREVIATIONS: &[(&str, Tz)] = &[
    ("UTC", Tz::UTC),
    ("GMT", Tz::Etc__GMT),
    ("ET", Tz::America__New_York),
    ("CT", Tz::America__Chicago),
    ("MT", Tz::America__Denver),
    ("PT", Tz::America__Los_Angeles),
    ("IST", Tz::Asia__Kolkata),
    ("CET", Tz::Europe__Berlin),
];

const DAILY_PREFIX: &str = "EVERYDAY";

#[derive(Debug, Clone)]
pub struct EventSchedule {
    event: String,
    schedule: Schedule,
    tz: Tz,
}

/// Outcome of a due check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run now; `fire_time` is the reference time for the window calculator.
    Due { fire_time: DateTime<Utc> },
    NotDue { next_fire: Option<DateTime<Utc>> },
}

/// Optional [start, end] bounds from the job definition (epoch ms).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveBounds {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl ActiveBounds {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let ms = t.timestamp_millis();
        self.start_ms.is_none_or(|s| ms >= s) && self.end_ms.is_none_or(|e| ms <= e)
    }
}

/// Resolves an event name. `job_tz` applies unless the event names its own zone.
/// Unknown names are an error, never a silent default.
pub fn resolve_event(event_name: &str, job_tz: Tz) -> Result<EventSchedule, ConfigError> {
    let name = event_name.trim().to_ascii_uppercase();

    if let Some((_, expr)) = EVENT_CATALOGUE.iter().find(|(n, _)| *n == name) {
        return EventSchedule::from_cron(&name, expr, job_tz);
    }

    if let Some((hour, tz)) = parse_daily_at(&name)? {
        let expr = format!("0 0 {} * * *", hour);
        return EventSchedule::from_cron(&name, &expr, tz);
    }

    Err(ConfigError::UnknownEvent(event_name.to_string()))
}

/// EVERYDAY8AMET -> (8, America/New_York). `Ok(None)` when the name is not of this shape.
fn parse_daily_at(name: &str) -> Result<Option<(u32, Tz)>, ConfigError> {
    let Some(rest) = name.strip_prefix(DAILY_PREFIX) else {
        return Ok(None);
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > 2 {
        return Ok(None);
    }
    let rest = &rest[digits.len()..];
    let (pm, zone) = if let Some(z) = rest.strip_prefix("AM") {
        (false, z)
    } else if let Some(z) = rest.strip_prefix("PM") {
        (true, z)
    } else {
        return Ok(None);
    };
    let hour: u32 = digits
        .parse()
        .map_err(|_| ConfigError::UnknownEvent(name.to_string()))?;
    if !(1..=12).contains(&hour) {
        return Err(ConfigError::UnknownEvent(name.to_string()));
    }
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    let tz = ZONE_ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == zone)
        .map(|(_, tz)| *tz)
        .ok_or_else(|| ConfigError::InvalidTimezone(zone.to_string()))?;
    Ok(Some((hour, tz)))
}

impl EventSchedule {
    fn from_cron(event: &str, expr: &str, tz: Tz) -> Result<Self, ConfigError> {
        let schedule = Schedule::from_str(expr).map_err(|e| ConfigError::InvalidSchedule {
            event: event.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            event: event.to_string(),
            schedule,
            tz,
        })
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Latest scheduled instant at or before `now`.
    pub fn latest_fire_at_or_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Fire times are whole seconds; anchor one second past `now` (sub-second dropped)
        // and step backwards once.
        let whole = now - TimeDelta::nanoseconds(now.timestamp_subsec_nanos() as i64);
        let anchor = (whole + TimeDelta::seconds(1)).with_timezone(&self.tz);
        self.schedule
            .after(&anchor)
            .next_back()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Due when the latest fire time is newer than `last_fired` and inside `bounds`.
    pub fn decide(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
        bounds: ActiveBounds,
    ) -> Decision {
        let not_due = || Decision::NotDue {
            next_fire: self.next_fire_after(now),
        };
        let Some(fire_time) = self.latest_fire_at_or_before(now) else {
            return not_due();
        };
        if !bounds.contains(fire_time) {
            return not_due();
        }
        match last_fired {
            Some(last) if last >= fire_time => not_due(),
            _ => Decision::Due { fire_time },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn every_catalogue_entry_compiles() {
        for (name, _) in EVENT_CATALOGUE {
            resolve_event(name, Tz::UTC).unwrap();
        }
    }

    #[test]
    fn event_names_are_case_insensitive() {
        let s = resolve_event(" everyhour ", Tz::UTC).unwrap();
        assert_eq!(s.event(), "EVERYHOUR");
    }

    #[test]
    fn daily_at_parses_clock_and_zone() {
        assert_eq!(
            parse_daily_at("EVERYDAY8AMET").unwrap(),
            Some((8, Tz::America__New_York))
        );
        assert_eq!(parse_daily_at("EVERYDAY12AMUTC").unwrap(), Some((0, Tz::UTC)));
        assert_eq!(parse_daily_at("EVERYDAY12PMUTC").unwrap(), Some((12, Tz::UTC)));
        assert_eq!(parse_daily_at("EVERYDAY11PMCT").unwrap(), Some((23, Tz::America__Chicago)));
        assert_eq!(parse_daily_at("EVERYDAY").unwrap(), None);
        assert!(matches!(
            parse_daily_at("EVERYDAY8AMXYZ"),
            Err(ConfigError::InvalidTimezone(_))
        ));
        assert!(parse_daily_at("EVERYDAY13PMUTC").is_err());
    }

    #[test]
    fn latest_fire_includes_exact_boundary() {
        let s = resolve_event("EVERYHOUR", Tz::UTC).unwrap();
        assert_eq!(
            s.latest_fire_at_or_before(utc("2025-03-10T10:00:00Z")),
            Some(utc("2025-03-10T10:00:00Z"))
        );
        assert_eq!(
            s.latest_fire_at_or_before(utc("2025-03-10T09:59:59.900Z")),
            Some(utc("2025-03-10T09:00:00Z"))
        );
    }

    #[test]
    fn end_bound_stops_firing() {
        let s = resolve_event("EVERYHOUR", Tz::UTC).unwrap();
        let bounds = ActiveBounds {
            start_ms: None,
            end_ms: Some(utc("2025-03-10T08:00:00Z").timestamp_millis()),
        };
        assert!(matches!(
            s.decide(utc("2025-03-10T10:30:00Z"), None, bounds),
            Decision::NotDue { .. }
        ));
    }
}
