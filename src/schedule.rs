//! Resolving scheduled trip start times against the wall clock.
//!
//! Start times are stored as a recurring time of day with no date attached.
//! A repetition that began late in the evening is routinely still being
//! queried after midnight, so resolution anchors the time of day to today
//! and steps back one day whenever that lands in the future.

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Parse a stored start time literal. Accepts `HH:MM:SS` and `HH:MM`.
pub fn parse_start_time(literal: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(literal, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(literal, "%H:%M"))
        .ok()
}

/// Canonical storage form of a start time.
pub fn format_start_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

/// Anchor a scheduled time of day to an absolute instant.
///
/// The time of day is combined with today's date; if that instant is still
/// ahead of `now`, the trip is taken to have started yesterday. The rule is
/// applied unconditionally, so a trip that genuinely has not started yet
/// today also resolves to yesterday.
pub fn resolve_start_instant(start: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let mut resolved = now.date().and_time(start);
    if resolved > now {
        resolved -= Duration::days(1);
    }
    resolved
}

/// Scheduled arrival instant for a stop `offset_minutes` into the trip.
pub fn stop_instant(start: NaiveDateTime, offset_minutes: f64) -> NaiveDateTime {
    start + Duration::seconds((offset_minutes * 60.0) as i64)
}

/// Whole minutes from `now` until `target`, rounded to nearest. Negative when
/// the target has passed.
pub fn minutes_until(target: NaiveDateTime, now: NaiveDateTime) -> i64 {
    let secs = (target - now).num_seconds();
    (secs as f64 / 60.0).round() as i64
}

/// `HH:MM` rendering used everywhere a stop time is shown to a rider.
pub fn format_hhmm(instant: NaiveDateTime) -> String {
    instant.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn parses_both_literal_forms() {
        assert_eq!(
            parse_start_time("08:30:00"),
            NaiveTime::from_hms_opt(8, 30, 0)
        );
        assert_eq!(parse_start_time("08:30"), NaiveTime::from_hms_opt(8, 30, 0));
        assert_eq!(parse_start_time("25:00:00"), None);
        assert_eq!(parse_start_time("eight"), None);
    }

    #[test]
    fn start_earlier_today_stays_today() {
        let now = at(2024, 3, 12, 14, 0);
        let start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert_eq!(resolve_start_instant(start, now), at(2024, 3, 12, 8, 0));
    }

    #[test]
    fn evening_start_queried_after_midnight_resolves_to_yesterday() {
        let now = at(2024, 3, 12, 0, 15);
        let start = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert_eq!(resolve_start_instant(start, now), at(2024, 3, 11, 23, 30));
    }

    #[test]
    fn not_yet_started_morning_trip_also_resolves_to_yesterday() {
        // The adjustment is unconditional: a 6 AM query of an 8 AM schedule
        // classifies the trip as having started yesterday.
        let now = at(2024, 3, 12, 6, 0);
        let start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert_eq!(resolve_start_instant(start, now), at(2024, 3, 11, 8, 0));
    }

    #[test]
    fn stop_instants_and_rounding() {
        let start = at(2024, 3, 12, 8, 0);
        assert_eq!(stop_instant(start, 10.0), at(2024, 3, 12, 8, 10));
        assert_eq!(format_hhmm(stop_instant(start, 20.0)), "08:20");

        let now = at(2024, 3, 12, 8, 0);
        assert_eq!(minutes_until(at(2024, 3, 12, 8, 10), now), 10);
        assert_eq!(minutes_until(at(2024, 3, 12, 7, 50), now), -10);
        // 90 seconds away rounds to 2 minutes.
        let soon = start + Duration::seconds(90);
        assert_eq!(minutes_until(soon, now), 2);
    }
}
