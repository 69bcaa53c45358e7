//! WebDAV multistatus parsing
//!
//! CalDAV responds to `PROPFIND` and `REPORT` with a `DAV:` multistatus
//! document. The reader below ignores namespace prefixes and pulls out the
//! handful of elements we care about: `href`, `displayname`, the
//! `calendar` resourcetype marker, `calendar-description`, and the embedded
//! `calendar-data` payload.

use quick_xml::events::Event;
use quick_xml::Reader;

use calbridge_domain::{CalendarError, Result};

/// One `<response>` entry of a multistatus document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResponse {
    pub href: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Set when the resourcetype contains a `calendar` element.
    pub is_calendar: bool,
    /// Raw iCalendar payload from `calendar-data`, when requested.
    pub calendar_data: Option<String>,
}

fn local_name(name: &[u8]) -> Vec<u8> {
    match name.iter().rposition(|b| *b == b':') {
        Some(pos) => name[pos + 1..].to_vec(),
        None => name.to_vec(),
    }
}

/// Parse a multistatus body into its response entries.
///
/// # Errors
/// Fails on malformed XML; entries without an `href` are dropped.
pub fn parse_multistatus(body: &str) -> Result<Vec<DavResponse>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut current: Option<DavResponse> = None;
    let mut text_target: Option<Vec<u8>> = None;
    let mut in_resourcetype = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| CalendarError::Serialization(format!("invalid multistatus: {e}")))?;
        match event {
            Event::Start(start) => {
                let name = local_name(start.name().as_ref());
                match name.as_slice() {
                    b"response" => current = Some(DavResponse::default()),
                    b"resourcetype" => in_resourcetype = true,
                    b"href" | b"displayname" | b"calendar-description" | b"calendar-data" => {
                        text_target = Some(name);
                    }
                    b"calendar" if in_resourcetype => {
                        if let Some(entry) = current.as_mut() {
                            entry.is_calendar = true;
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(empty) => {
                let name = local_name(empty.name().as_ref());
                if name.as_slice() == b"calendar" && in_resourcetype {
                    if let Some(entry) = current.as_mut() {
                        entry.is_calendar = true;
                    }
                }
            }
            Event::Text(text) => {
                let Some(target) = text_target.as_deref() else { continue };
                let Some(entry) = current.as_mut() else { continue };
                let value = text
                    .unescape()
                    .map_err(|e| CalendarError::Serialization(format!("invalid multistatus: {e}")))?
                    .into_owned();
                match target {
                    b"href" => entry.href = value,
                    b"displayname" => entry.display_name = Some(value),
                    b"calendar-description" => entry.description = Some(value),
                    b"calendar-data" => entry.calendar_data = Some(value),
                    _ => {}
                }
            }
            Event::CData(data) => {
                if text_target.as_deref() == Some(b"calendar-data") {
                    if let Some(entry) = current.as_mut() {
                        let value = String::from_utf8_lossy(data.as_ref()).into_owned();
                        entry.calendar_data = Some(value);
                    }
                }
            }
            Event::End(end) => {
                let name = local_name(end.name().as_ref());
                match name.as_slice() {
                    b"response" => {
                        if let Some(entry) = current.take() {
                            if !entry.href.is_empty() {
                                responses.push(entry);
                            }
                        }
                    }
                    b"resourcetype" => in_resourcetype = false,
                    _ => {
                        if text_target.as_deref() == Some(name.as_slice()) {
                            text_target = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(responses)
}
