// Window calculator and schedule resolver properties

mod common;

use batch_analytics::models::Granularity;
use batch_analytics::schedule::{ActiveBounds, Decision, resolve_event};
use batch_analytics::window::{compute_window, windows_between};
use chrono::TimeDelta;
use chrono_tz::Tz;
use common::utc;

const GRANULARITIES: &[&str] = &[
    "1-minute", "5-minute", "15-minute", "30-minute", "1-hour", "2-hour", "6-hour", "12-hour",
    "1-day", "7-day", "1-week", "2-weeks",
];

const REFERENCES: &[&str] = &[
    "2025-03-10T10:47:12Z",
    "2025-03-30T01:30:00Z",
    "2025-10-26T00:59:59Z",
    "2024-02-29T23:59:59Z",
];

const ZONES: &[Tz] = &[Tz::UTC, Tz::Europe__Berlin, Tz::America__New_York, Tz::Asia__Kolkata];

#[test]
fn window_length_is_exactly_the_granularity() {
    for g in GRANULARITIES {
        let g: Granularity = g.parse().unwrap();
        for r in REFERENCES {
            for tz in ZONES {
                let w = compute_window(&g, 1, utc(r), *tz).unwrap();
                assert_eq!(w.end - w.start, g.duration(), "{g} at {r} in {tz}");
            }
        }
    }
}

#[test]
fn delay_shifts_end_by_whole_granularities() {
    for g in GRANULARITIES {
        let g: Granularity = g.parse().unwrap();
        for r in REFERENCES {
            let base = compute_window(&g, 0, utc(r), Tz::UTC).unwrap();
            for d in 0..5u32 {
                let w = compute_window(&g, d, utc(r), Tz::UTC).unwrap();
                assert_eq!(w.end, base.end - g.duration() * d as i32, "{g} delay {d}");
            }
        }
    }
}

#[test]
fn one_hour_delay_one_at_ten_forty_seven() {
    let g: Granularity = "1-hour".parse().unwrap();
    let w = compute_window(&g, 1, utc("2025-03-10T10:47:00Z"), Tz::UTC).unwrap();
    assert_eq!(w.start, utc("2025-03-10T09:00:00Z"));
    assert_eq!(w.end, utc("2025-03-10T10:00:00Z"));
}

#[test]
fn day_windows_follow_the_job_timezone() {
    let g: Granularity = "1-day".parse().unwrap();
    let w = compute_window(&g, 1, utc("2025-03-10T10:00:00Z"), Tz::Asia__Kolkata).unwrap();
    // Kolkata is UTC+05:30; local midnight on 03-10 is 03-09T18:30Z.
    assert_eq!(w.end, utc("2025-03-09T18:30:00Z"));
    assert_eq!(w.start, utc("2025-03-08T18:30:00Z"));
}

#[test]
fn day_windows_keep_fixed_length_across_dst() {
    // Berlin's 2025-03-30 has 23 local hours. The window rolled up on 03-31 is still
    // 24 hours long, so it reaches one hour back into the window rolled up on 03-30.
    let g: Granularity = "1-day".parse().unwrap();
    let berlin = Tz::Europe__Berlin;
    let on_30th = compute_window(&g, 1, utc("2025-03-30T10:00:00Z"), berlin).unwrap();
    let on_31st = compute_window(&g, 1, utc("2025-03-31T10:00:00Z"), berlin).unwrap();
    assert_eq!(on_30th.start, utc("2025-03-28T23:00:00Z"));
    assert_eq!(on_30th.end, utc("2025-03-29T23:00:00Z"));
    assert_eq!(on_31st.end, utc("2025-03-30T22:00:00Z"));
    assert_eq!(on_31st.start, utc("2025-03-29T22:00:00Z"));
    assert_eq!(on_30th.end - on_31st.start, TimeDelta::hours(1));
}

#[test]
fn huge_day_and_week_amounts_are_rejected() {
    for bad in ["100000000-day", "3661-day", "523-weeks", "4294967295-week"] {
        assert!(bad.parse::<Granularity>().is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn weekly_event_fires_on_monday_and_rolls_up_the_previous_week() {
    let s = resolve_event("EVERYWEEK", Tz::UTC).unwrap();
    // 2025-03-13 is a Thursday; the latest fire is Monday 2025-03-10 00:00.
    let fire = s.latest_fire_at_or_before(utc("2025-03-13T08:00:00Z")).unwrap();
    assert_eq!(fire, utc("2025-03-10T00:00:00Z"));

    let g: Granularity = "1-week".parse().unwrap();
    let w = compute_window(&g, 1, fire, Tz::UTC).unwrap();
    assert_eq!(w.start, utc("2025-03-03T00:00:00Z"));
    assert_eq!(w.end, fire);
}

#[test]
fn invalid_granularities_fail_fast() {
    for bad in ["", "hour", "0-hour", "1-month", "-1-hour", "7-minute", "5-hour", "1.5-hour"] {
        assert!(bad.parse::<Granularity>().is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn windows_between_tiles_the_range() {
    let g: Granularity = "15-minute".parse().unwrap();
    let ws = windows_between(&g, Tz::UTC, utc("2025-03-10T09:00:00Z"), utc("2025-03-10T10:05:00Z"))
        .unwrap();
    assert_eq!(ws.len(), 4);
    assert_eq!(ws[0].start, utc("2025-03-10T09:00:00Z"));
    assert_eq!(ws[3].end, utc("2025-03-10T10:00:00Z"));
    for pair in ws.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

#[test]
fn due_decision_is_stable_within_a_tick() {
    let s = resolve_event("EVERY15MINUTES", Tz::UTC).unwrap();
    let now = utc("2025-03-10T10:47:00Z");
    let Decision::Due { fire_time } = s.decide(now, None, ActiveBounds::default()) else {
        panic!("expected due");
    };
    assert_eq!(fire_time, utc("2025-03-10T10:45:00Z"));
    let later = now + TimeDelta::seconds(30);
    assert!(matches!(
        s.decide(later, Some(fire_time), ActiveBounds::default()),
        Decision::NotDue { next_fire: Some(t) } if t == utc("2025-03-10T11:00:00Z")
    ));
}

#[test]
fn daily_event_fires_in_its_own_zone() {
    // 08:00 New York during EDT is 12:00Z.
    let s = resolve_event("EVERYDAY8AMET", Tz::UTC).unwrap();
    assert_eq!(
        s.latest_fire_at_or_before(utc("2025-06-02T13:00:00Z")),
        Some(utc("2025-06-02T12:00:00Z"))
    );
}

#[test]
fn start_bound_delays_first_fire() {
    let s = resolve_event("EVERYHOUR", Tz::UTC).unwrap();
    let bounds = ActiveBounds {
        start_ms: Some(utc("2025-03-10T12:00:00Z").timestamp_millis()),
        end_ms: None,
    };
    assert!(matches!(
        s.decide(utc("2025-03-10T10:30:00Z"), None, bounds),
        Decision::NotDue { .. }
    ));
    assert!(matches!(
        s.decide(utc("2025-03-10T12:30:00Z"), None, bounds),
        Decision::Due { .. }
    ));
}

#[test]
fn unknown_events_are_errors() {
    assert!(resolve_event("EVERYFORTNIGHT", Tz::UTC).is_err());
    assert!(resolve_event("", Tz::UTC).is_err());
}
