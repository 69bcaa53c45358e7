//! iCalendar (RFC 5545) encoding and decoding
//!
//! Just enough of the format for CalDAV appointment traffic: single-`VEVENT`
//! objects with text escaping, 75-octet line folding, UTC and TZID-qualified
//! timestamps, and the `X-PATIENT` extension line carrying the appointment
//! payload as escaped JSON.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use calbridge_domain::availability::{local_to_utc, resolve_timezone};
use calbridge_domain::{
    AppointmentDetails, Attendee, CalendarError, CalendarEvent, CalendarProvider, EventStatus,
    Result,
};

const PRODID: &str = "-//Calbridge//Calendar Integration//EN";
const FOLD_LIMIT: usize = 75;
const UTC_STAMP: &str = "%Y%m%dT%H%M%SZ";
const LOCAL_STAMP: &str = "%Y%m%dT%H%M%S";

/// Escape property text per RFC 5545 section 3.3.11.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Fold a content line at 75 octets, continuing with a leading space.
fn fold_line(line: &str, out: &mut String) {
    let bytes = line.as_bytes();
    if bytes.len() <= FOLD_LIMIT {
        out.push_str(line);
        out.push_str("\r\n");
        return;
    }

    let mut start = 0;
    let mut first = true;
    while start < bytes.len() {
        let limit = if first { FOLD_LIMIT } else { FOLD_LIMIT - 1 };
        let mut end = (start + limit).min(bytes.len());
        // Back off to a char boundary so folding never splits a codepoint.
        while end > start && !line.is_char_boundary(end) {
            end -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&line[start..end]);
        out.push_str("\r\n");
        start = end;
        first = false;
    }
}

/// Reverse folding: join lines continued with a leading space or tab.
fn unfold(ics: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in ics.split(['\r', '\n']).filter(|l| !l.is_empty()) {
        if let Some(rest) = raw.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

fn push_property(out: &mut String, name: &str, value: &str) {
    fold_line(&format!("{name}:{value}"), out);
}

/// Serialize an appointment as a complete `VCALENDAR` document.
///
/// # Errors
/// Fails when the patient payload cannot be serialized.
pub fn build_vevent(uid: &str, details: &AppointmentDetails) -> Result<String> {
    let mut out = String::new();
    push_property(&mut out, "BEGIN", "VCALENDAR");
    push_property(&mut out, "VERSION", "2.0");
    push_property(&mut out, "PRODID", PRODID);
    push_property(&mut out, "BEGIN", "VEVENT");
    push_property(&mut out, "UID", uid);
    push_property(&mut out, "DTSTAMP", &Utc::now().format(UTC_STAMP).to_string());
    push_property(&mut out, "DTSTART", &details.start.format(UTC_STAMP).to_string());
    push_property(&mut out, "DTEND", &details.end.format(UTC_STAMP).to_string());
    push_property(&mut out, "SUMMARY", &escape_text(&details.title));
    if let Some(description) = &details.description {
        push_property(&mut out, "DESCRIPTION", &escape_text(description));
    }
    if let Some(location) = &details.location {
        push_property(&mut out, "LOCATION", &escape_text(location));
    }
    for attendee in &details.attendees {
        let line = match &attendee.name {
            Some(name) => {
                format!("ATTENDEE;CN={}:mailto:{}", escape_text(name), attendee.email)
            }
            None => format!("ATTENDEE:mailto:{}", attendee.email),
        };
        fold_line(&line, &mut out);
    }
    if let Some(patient) = &details.patient {
        push_property(&mut out, "X-PATIENT", &escape_text(&serde_json::to_string(patient)?));
    }
    push_property(&mut out, "STATUS", "CONFIRMED");
    if let Some(minutes) = details.reminder_minutes {
        push_property(&mut out, "BEGIN", "VALARM");
        push_property(&mut out, "ACTION", "DISPLAY");
        push_property(&mut out, "DESCRIPTION", "Reminder");
        push_property(&mut out, "TRIGGER", &format!("-PT{minutes}M"));
        push_property(&mut out, "END", "VALARM");
    }
    push_property(&mut out, "END", "VEVENT");
    push_property(&mut out, "END", "VCALENDAR");
    Ok(out)
}

/// One unfolded content line split into name, parameters, and value.
struct ContentLine<'a> {
    name: &'a str,
    params: Vec<(&'a str, &'a str)>,
    value: &'a str,
}

fn split_line(line: &str) -> Option<ContentLine<'_>> {
    let colon = line.find(':')?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);
    let mut parts = head.split(';');
    let name = parts.next()?;
    let params = parts
        .filter_map(|param| {
            let eq = param.find('=')?;
            Some((&param[..eq], &param[eq + 1..]))
        })
        .collect();
    Some(ContentLine { name, params, value })
}

fn parse_timestamp(line: &ContentLine<'_>) -> Result<DateTime<Utc>> {
    let value = line.value;
    let bad = |detail: &str| {
        CalendarError::Serialization(format!("bad iCalendar timestamp {value:?}: {detail}"))
    };

    // Date-only values (all-day events) resolve to local midnight.
    if line.params.iter().any(|(k, v)| *k == "VALUE" && *v == "DATE") {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|e| bad(&e.to_string()))?;
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| bad("no midnight"))?;
        return Ok(midnight.and_utc());
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, LOCAL_STAMP)
            .map_err(|e| bad(&e.to_string()))?;
        return Ok(naive.and_utc());
    }

    let naive =
        NaiveDateTime::parse_from_str(value, LOCAL_STAMP).map_err(|e| bad(&e.to_string()))?;
    let tzid = line.params.iter().find(|(k, _)| *k == "TZID").map(|(_, v)| *v);
    let tz = resolve_timezone(tzid)?;
    local_to_utc(naive, tz)
}

fn parse_attendee(line: &ContentLine<'_>) -> Option<Attendee> {
    let email = line.value.strip_prefix("mailto:").unwrap_or(line.value);
    if email.is_empty() {
        return None;
    }
    let name = line
        .params
        .iter()
        .find(|(k, _)| *k == "CN")
        .map(|(_, v)| unescape_text(v.trim_matches('"')));
    Some(Attendee { email: email.to_string(), name })
}

/// Parse the first `VEVENT` of an iCalendar document into a normalized event.
///
/// `event_id` is the CalDAV resource name (the `.ics` basename) the service
/// layer uses for subsequent updates and deletes.
pub fn parse_vevent(ics: &str, event_id: &str) -> Result<CalendarEvent> {
    let mut in_event = false;
    let mut in_alarm = false;

    let mut uid = None;
    let mut title = String::new();
    let mut description = None;
    let mut location = None;
    let mut start = None;
    let mut end = None;
    let mut status = EventStatus::Confirmed;
    let mut attendees = Vec::new();
    let mut organizer = None;
    let mut recurrence = None;
    let mut patient = None;

    for line in unfold(ics) {
        let Some(parsed) = split_line(&line) else { continue };
        match (parsed.name, parsed.value) {
            ("BEGIN", "VEVENT") => in_event = true,
            ("END", "VEVENT") => break,
            ("BEGIN", "VALARM") => in_alarm = true,
            ("END", "VALARM") => in_alarm = false,
            _ if !in_event || in_alarm => {}
            ("UID", value) => uid = Some(value.to_string()),
            ("SUMMARY", value) => title = unescape_text(value),
            ("DESCRIPTION", value) => description = Some(unescape_text(value)),
            ("LOCATION", value) => location = Some(unescape_text(value)),
            ("DTSTART", _) => start = Some(parse_timestamp(&parsed)?),
            ("DTEND", _) => end = Some(parse_timestamp(&parsed)?),
            ("STATUS", value) => {
                status = match value {
                    "CANCELLED" => EventStatus::Cancelled,
                    "TENTATIVE" => EventStatus::Tentative,
                    _ => EventStatus::Confirmed,
                };
            }
            ("ATTENDEE", _) => {
                if let Some(attendee) = parse_attendee(&parsed) {
                    attendees.push(attendee);
                }
            }
            ("ORGANIZER", _) => organizer = parse_attendee(&parsed),
            ("RRULE", value) => recurrence = Some(value.to_string()),
            ("X-PATIENT", value) => {
                patient = serde_json::from_str(&unescape_text(value)).ok();
            }
            _ => {}
        }
    }

    let start = start.ok_or_else(|| {
        CalendarError::Serialization(format!("iCalendar object {event_id} has no DTSTART"))
    })?;
    let end = end.ok_or_else(|| {
        CalendarError::Serialization(format!("iCalendar object {event_id} has no DTEND"))
    })?;

    Ok(CalendarEvent {
        id: event_id.to_string(),
        title,
        description,
        start,
        end,
        timezone: None,
        location,
        status,
        attendees,
        organizer,
        recurrence,
        patient,
        provider: CalendarProvider::Apple,
        provider_event_id: uid.unwrap_or_else(|| event_id.to_string()),
    })
}

/// Timestamps in CalDAV time-range filters use the compact UTC form.
#[must_use]
pub fn caldav_timestamp(t: DateTime<Utc>) -> String {
    t.format(UTC_STAMP).to_string()
}
