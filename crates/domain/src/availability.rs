//! Pure availability math
//!
//! Interval merging, free-window complement, business-hours checks, and slot
//! generation. No I/O; every provider adapter and the service facade share
//! these semantics so all backends produce identical scheduling behavior.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::constants::SLOT_STEP_MINUTES;
use crate::errors::{CalendarError, Result};
use crate::types::{AvailabilityQuery, AvailableSlot, BusinessHours, TimeSlot};

/// Resolve an IANA timezone name, defaulting to UTC when absent.
///
/// # Errors
/// Returns `InvalidInput` for unknown timezone names.
pub fn resolve_timezone(timezone: Option<&str>) -> Result<Tz> {
    match timezone {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| CalendarError::InvalidInput(format!("unknown timezone: {name}"))),
        None => Ok(Tz::UTC),
    }
}

/// Format a UTC timestamp as RFC 3339 with seconds precision.
#[must_use]
pub fn to_rfc3339_utc(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Sort and coalesce busy intervals, merging overlapping and
/// boundary-adjacent runs into maximal intervals.
#[must_use]
pub fn merge_busy(mut intervals: Vec<TimeSlot>) -> Vec<TimeSlot> {
    intervals.retain(|slot| slot.end > slot.start);
    intervals.sort_by_key(|slot| slot.start);

    let mut merged: Vec<TimeSlot> = Vec::with_capacity(intervals.len());
    for slot in intervals {
        match merged.last_mut() {
            Some(last) if slot.start <= last.end => {
                if slot.end > last.end {
                    last.end = slot.end;
                }
            }
            _ => merged.push(slot),
        }
    }
    merged
}

/// Free intervals within `window` not covered by `busy`.
///
/// `busy` is merged internally; together the outputs partition the window:
/// `available ∪ busy` covers it and `available ∩ busy` is empty.
#[must_use]
pub fn complement(window: &TimeSlot, busy: &[TimeSlot]) -> Vec<TimeSlot> {
    let merged = merge_busy(busy.to_vec());
    let mut available = Vec::new();
    let mut cursor = window.start;

    for slot in &merged {
        if slot.end <= window.start || slot.start >= window.end {
            continue;
        }
        if slot.start > cursor {
            available.push(TimeSlot::new(cursor, slot.start.min(window.end)));
        }
        cursor = cursor.max(slot.end);
    }

    if cursor < window.end {
        available.push(TimeSlot::new(cursor, window.end));
    }
    available
}

/// Check whether `t`, viewed in `tz`, falls inside the business-hours window.
#[must_use]
pub fn within_business_hours(t: DateTime<Utc>, tz: Tz, hours: &BusinessHours) -> bool {
    let local = t.with_timezone(&tz);
    let minute_of_day = local.hour() * 60 + local.minute();
    hours.days.contains(&local.weekday())
        && minute_of_day >= hours.start_minute
        && minute_of_day < hours.end_minute
}

/// Check whether `t`, viewed in `tz`, lands on an excluded date
/// (date-only comparison, ignoring time).
#[must_use]
pub fn is_excluded_date(t: DateTime<Utc>, tz: Tz, excluded: &[NaiveDate]) -> bool {
    let local_date = t.with_timezone(&tz).date_naive();
    excluded.contains(&local_date)
}

/// Generate bookable slots for a query, given the calendar's busy intervals.
///
/// The window is walked in fixed 15-minute steps regardless of the requested
/// duration; a candidate `[t, t + duration)` is accepted iff it overlaps no
/// busy interval, `t` is not on an excluded date, and `t` falls within
/// business hours when they are configured.
///
/// # Errors
/// Returns `InvalidInput` for a non-positive duration, an inverted window, or
/// an unknown timezone name.
pub fn generate_slots(query: &AvailabilityQuery, busy: &[TimeSlot]) -> Result<Vec<AvailableSlot>> {
    if query.duration_minutes <= 0 {
        return Err(CalendarError::InvalidInput(format!(
            "slot duration must be positive, got {}",
            query.duration_minutes
        )));
    }
    if query.end <= query.start {
        return Err(CalendarError::InvalidInput(
            "availability window end must be after start".to_string(),
        ));
    }

    let tz = resolve_timezone(query.timezone.as_deref())?;
    let merged = merge_busy(busy.to_vec());
    let duration = Duration::minutes(query.duration_minutes);
    let step = Duration::minutes(SLOT_STEP_MINUTES);

    let mut slots = Vec::new();
    let mut t = query.start;
    while t + duration <= query.end {
        let candidate = TimeSlot::new(t, t + duration);
        let blocked = merged.iter().any(|b| candidate.overlaps(b))
            || is_excluded_date(t, tz, &query.exclude_dates)
            || query
                .business_hours
                .as_ref()
                .is_some_and(|hours| !within_business_hours(t, tz, hours));

        if !blocked {
            slots.push(AvailableSlot {
                start: candidate.start,
                end: candidate.end,
                duration_minutes: query.duration_minutes,
                available: true,
            });
        }
        t += step;
    }

    Ok(slots)
}

/// Convert a local wall-clock time in `tz` to UTC, rejecting nonexistent
/// local times (DST gaps).
///
/// # Errors
/// Returns `InvalidInput` when the local time does not exist in `tz`.
pub fn local_to_utc(local: chrono::NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CalendarError::InvalidInput(format!("nonexistent local time: {local}")))
}

#[cfg(test)]
mod tests {
    //! Unit tests for availability math.
    use chrono::{TimeZone, Weekday};

    use super::*;

    fn ts(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, day, h, m, 0).unwrap()
    }

    fn slot(day: u32, h1: u32, m1: u32, h2: u32, m2: u32) -> TimeSlot {
        TimeSlot::new(ts(day, h1, m1), ts(day, h2, m2))
    }

    #[test]
    fn merge_coalesces_overlapping_and_adjacent_runs() {
        let merged = merge_busy(vec![
            slot(1, 10, 0, 11, 0),
            slot(1, 10, 30, 11, 30),
            slot(1, 11, 30, 12, 0),
            slot(1, 14, 0, 15, 0),
        ]);
        assert_eq!(merged, vec![slot(1, 10, 0, 12, 0), slot(1, 14, 0, 15, 0)]);
    }

    #[test]
    fn merge_drops_empty_intervals() {
        let merged = merge_busy(vec![slot(1, 10, 0, 10, 0), slot(1, 11, 0, 12, 0)]);
        assert_eq!(merged, vec![slot(1, 11, 0, 12, 0)]);
    }

    #[test]
    fn complement_partitions_the_window() {
        let window = slot(1, 9, 0, 17, 0);
        let busy = vec![slot(1, 10, 0, 11, 0), slot(1, 13, 0, 14, 30)];
        let available = complement(&window, &busy);

        assert_eq!(
            available,
            vec![slot(1, 9, 0, 10, 0), slot(1, 11, 0, 13, 0), slot(1, 14, 30, 17, 0)]
        );

        // available ∪ busy covers the window and the two never overlap
        let mut covered: Vec<TimeSlot> = busy.clone();
        covered.extend(available.iter().copied());
        let covered = merge_busy(covered);
        assert_eq!(covered, vec![window]);
        for free in &available {
            assert!(!busy.iter().any(|b| free.overlaps(b)));
        }
    }

    #[test]
    fn complement_of_empty_busy_is_whole_window() {
        let window = slot(1, 9, 0, 12, 0);
        assert_eq!(complement(&window, &[]), vec![window]);
    }

    #[test]
    fn complement_clamps_busy_extending_past_window() {
        let window = slot(1, 9, 0, 12, 0);
        let busy = vec![slot(1, 8, 0, 10, 0), slot(1, 11, 30, 13, 0)];
        assert_eq!(complement(&window, &busy), vec![slot(1, 10, 0, 11, 30)]);
    }

    #[test]
    fn slots_avoid_busy_intervals_and_keep_duration() {
        let query = AvailabilityQuery {
            start: ts(1, 9, 0),
            end: ts(1, 12, 0),
            duration_minutes: 30,
            timezone: None,
            business_hours: None,
            exclude_dates: vec![],
        };
        let busy = vec![slot(1, 10, 0, 11, 0)];
        let slots = generate_slots(&query, &busy).unwrap();

        assert!(!slots.is_empty());
        for s in &slots {
            assert_eq!(s.end - s.start, Duration::minutes(30));
            assert!(!TimeSlot::new(s.start, s.end).overlaps(&busy[0]));
        }
        // 9:00..9:30 start times fit before the meeting, 11:00..11:30 after
        assert_eq!(slots.first().map(|s| s.start), Some(ts(1, 9, 0)));
        assert!(slots.iter().any(|s| s.start == ts(1, 11, 0)));
        assert!(!slots.iter().any(|s| s.start == ts(1, 10, 0)));
    }

    #[test]
    fn long_durations_still_step_every_fifteen_minutes() {
        let query = AvailabilityQuery {
            start: ts(1, 9, 0),
            end: ts(1, 12, 0),
            duration_minutes: 90,
            timezone: None,
            business_hours: None,
            exclude_dates: vec![],
        };
        let slots = generate_slots(&query, &[]).unwrap();

        // 9:00 through 10:30 inclusive, every 15 minutes: overlapping
        // candidates are intentional.
        assert_eq!(slots.len(), 7);
        assert_eq!(slots[1].start - slots[0].start, Duration::minutes(15));
    }

    #[test]
    fn business_hours_filter_days_and_minutes() {
        // 2025-02-01 is a Saturday, 2025-02-03 a Monday.
        let hours = BusinessHours::weekdays_nine_to_five();
        assert!(!within_business_hours(ts(1, 10, 0), Tz::UTC, &hours));
        assert!(within_business_hours(ts(3, 10, 0), Tz::UTC, &hours));
        assert!(!within_business_hours(ts(3, 8, 59), Tz::UTC, &hours));
        assert!(!within_business_hours(ts(3, 17, 0), Tz::UTC, &hours));
    }

    #[test]
    fn business_hours_respect_query_timezone() {
        // 2025-02-03 17:30 UTC is 09:30 in Los Angeles.
        let hours = BusinessHours::weekdays_nine_to_five();
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        assert!(within_business_hours(ts(3, 17, 30), tz, &hours));
        assert!(!within_business_hours(ts(3, 17, 30), Tz::UTC, &hours));
    }

    #[test]
    fn excluded_dates_drop_whole_days() {
        let query = AvailabilityQuery {
            start: ts(1, 9, 0),
            end: ts(2, 17, 0),
            duration_minutes: 30,
            timezone: None,
            business_hours: None,
            exclude_dates: vec![NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()],
        };
        let slots = generate_slots(&query, &[]).unwrap();
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| s.start.date_naive().day() == 2));
    }

    #[test]
    fn generate_slots_rejects_bad_input() {
        let mut query = AvailabilityQuery {
            start: ts(1, 9, 0),
            end: ts(1, 12, 0),
            duration_minutes: 0,
            timezone: None,
            business_hours: None,
            exclude_dates: vec![],
        };
        assert!(generate_slots(&query, &[]).is_err());

        query.duration_minutes = 30;
        query.timezone = Some("Not/AZone".into());
        assert!(generate_slots(&query, &[]).is_err());
    }

    #[test]
    fn resolve_timezone_defaults_to_utc() {
        assert_eq!(resolve_timezone(None).unwrap(), Tz::UTC);
        assert!(resolve_timezone(Some("Europe/Berlin")).is_ok());
        assert!(resolve_timezone(Some("nope")).is_err());
    }
}
