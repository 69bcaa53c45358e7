//! Availability, free/busy, and conflict types

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::event::CalendarEvent;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Standard interval overlap test: `a.start < b.end && a.end > b.start`.
    ///
    /// Commutative, and boundary-adjacent intervals do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Weekly business-hours window: a set of weekdays plus a minute-of-day
/// range, evaluated in the query's timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessHours {
    pub days: Vec<Weekday>,
    /// Inclusive start, minutes past local midnight.
    pub start_minute: u32,
    /// Exclusive end, minutes past local midnight.
    pub end_minute: u32,
}

impl BusinessHours {
    /// Monday-Friday, 09:00-17:00.
    #[must_use]
    pub fn weekdays_nine_to_five() -> Self {
        Self {
            days: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            start_minute: 9 * 60,
            end_minute: 17 * 60,
        }
    }
}

/// Request for bookable slots within a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<BusinessHours>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_dates: Vec<NaiveDate>,
}

/// A candidate bookable time range proven free of conflicts.
///
/// Only available slots are ever materialized; unavailable time is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: i64,
    pub available: bool,
}

/// Free/busy lookup over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeBusyQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calendar_ids: Vec<String>,
}

/// Busy intervals for one calendar plus their computed complement.
///
/// `available` is always derived within the query window by this layer;
/// provider-reported free time is trusted only where the backend natively
/// returns it (the Outlook availability view).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeBusyResponse {
    pub calendar_id: String,
    pub busy: Vec<TimeSlot>,
    pub available: Vec<TimeSlot>,
}

/// Result of a conflict check; derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentConflict {
    pub has_conflict: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_events: Vec<CalendarEvent>,
}

impl AppointmentConflict {
    #[must_use]
    pub fn none() -> Self {
        Self { has_conflict: false, conflicting_events: Vec::new() }
    }

    #[must_use]
    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self { has_conflict: !events.is_empty(), conflicting_events: events }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for interval semantics.
    use chrono::TimeZone;

    use super::*;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, h, m, 0).unwrap()
    }

    #[test]
    fn overlap_is_commutative() {
        let a = TimeSlot::new(ts(10, 0), ts(11, 0));
        let b = TimeSlot::new(ts(10, 30), ts(11, 30));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn adjacent_intervals_do_not_overlap() {
        let a = TimeSlot::new(ts(10, 0), ts(11, 0));
        let b = TimeSlot::new(ts(11, 0), ts(12, 0));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn contained_interval_overlaps() {
        let outer = TimeSlot::new(ts(9, 0), ts(17, 0));
        let inner = TimeSlot::new(ts(12, 0), ts(12, 30));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }
}
