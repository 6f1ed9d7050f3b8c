//! iCalendar projection (RFC 5545).

use anyhow::Result;
use chrono::{DateTime, Utc};
use meeting_core::CanonicalMeetingRecord;
use std::path::Path;

pub const PRODID: &str = "-//Civic Meetings//EN";
const MAX_LINE_OCTETS: usize = 75;

pub fn to_ics(records: &[CanonicalMeetingRecord], dtstamp: DateTime<Utc>) -> String {
    let mut out = String::new();
    push(&mut out, "BEGIN:VCALENDAR");
    push(&mut out, "VERSION:2.0");
    push(&mut out, &format!("PRODID:{PRODID}"));
    push(&mut out, "CALSCALE:GREGORIAN");
    let stamp = utc_stamp(dtstamp);
    for record in records {
        push(&mut out, "BEGIN:VEVENT");
        push(&mut out, &format!("UID:{}", escape(&record.uid)));
        push(&mut out, &format!("DTSTAMP:{stamp}"));
        if record.all_day {
            push(&mut out, &format!("DTSTART;VALUE=DATE:{}", record.start.format("%Y%m%d")));
            push(&mut out, &format!("DTEND;VALUE=DATE:{}", record.end.format("%Y%m%d")));
        } else {
            push(&mut out, &format!("DTSTART:{}", utc_stamp(record.start.with_timezone(&Utc))));
            push(&mut out, &format!("DTEND:{}", utc_stamp(record.end.with_timezone(&Utc))));
        }
        push(&mut out, &format!("SUMMARY:{}", escape(&record.summary())));
        let location = [record.location.as_str(), record.address.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        if !location.is_empty() {
            push(&mut out, &format!("LOCATION:{}", escape(&location)));
        }
        let description = description(record);
        if !description.is_empty() {
            push(&mut out, &format!("DESCRIPTION:{}", escape(&description)));
        }
        if !record.detail_url.is_empty() {
            push(&mut out, &format!("URL:{}", record.detail_url));
        }
        push(&mut out, "STATUS:CONFIRMED");
        push(&mut out, "END:VEVENT");
    }
    push(&mut out, "END:VCALENDAR");
    out
}

pub fn write_ics(records: &[CanonicalMeetingRecord], path: &Path, dtstamp: DateTime<Utc>) -> Result<()> {
    crate::write_file(path, &to_ics(records, dtstamp))
}

fn description(record: &CanonicalMeetingRecord) -> String {
    [
        ("Agenda", &record.agenda_url),
        ("Minutes", &record.minutes_url),
        ("Virtual", &record.virtual_link),
        ("Details", &record.detail_url),
    ]
    .into_iter()
    .filter(|(_, url)| !url.is_empty())
    .map(|(label, url)| format!("{label}: {url}"))
    .collect::<Vec<_>>()
    .join("\n")
}

fn utc_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape(text: &str) -> String {
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

/// Appends one content line, folded at 75 octets without splitting a
/// character.
fn push(out: &mut String, line: &str) {
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > MAX_LINE_OCTETS {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(ch);
        width += len;
    }
    out.push_str("\r\n");
}
