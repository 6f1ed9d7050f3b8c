use super::links::absolutize;
use super::{clean, split_title_body};
use crate::error::UnparsableSourceError;
use crate::schema::{PartialMeetingRecord, SourceKind, TimeValue};
use crate::time::parse_time_text;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ical::IcalParser;
use ical::property::Property;
use regex::Regex;
use std::io::BufReader;
use std::sync::LazyLock;

static ICS_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").unwrap()
});

/// First `VEVENT` of a calendar payload.
pub fn parse_ics_event(payload: &str) -> Result<PartialMeetingRecord, UnparsableSourceError> {
    parse_ics_payload(payload)?
        .into_iter()
        .next()
        .ok_or_else(|| unparsable("calendar has no VEVENT"))
}

/// Every `VEVENT` in a calendar payload. A bare `VEVENT` block without the
/// `VCALENDAR` wrapper is accepted.
pub fn parse_ics_payload(payload: &str) -> Result<Vec<PartialMeetingRecord>, UnparsableSourceError> {
    let trimmed = payload.trim_start_matches('\u{feff}').trim();
    let upper = trimmed.to_ascii_uppercase();
    let wrapped;
    let text = if upper.contains("BEGIN:VCALENDAR") {
        trimmed
    } else if upper.contains("BEGIN:VEVENT") {
        wrapped = format!("BEGIN:VCALENDAR\r\nVERSION:2.0\r\n{trimmed}\r\nEND:VCALENDAR\r\n");
        wrapped.as_str()
    } else {
        return Err(unparsable("payload is not an iCalendar document"));
    };

    let mut events = Vec::new();
    for calendar in IcalParser::new(BufReader::new(text.as_bytes())) {
        let calendar = calendar.map_err(|err| unparsable(format!("malformed calendar: {err}")))?;
        events.extend(calendar.events.iter().map(|event| event_to_partial(&event.properties)));
    }
    if events.is_empty() {
        return Err(unparsable("calendar has no VEVENT"));
    }
    Ok(events)
}

fn event_to_partial(properties: &[Property]) -> PartialMeetingRecord {
    let mut partial = PartialMeetingRecord::new(SourceKind::Ics);

    let start = property(properties, "DTSTART").and_then(ics_time);
    let end = property(properties, "DTEND").and_then(ics_time).or_else(|| {
        let duration = property(properties, "DURATION")?.value.as_deref().and_then(parse_duration)?;
        start.as_ref().and_then(|start| shift(start, duration))
    });
    partial.all_day = start
        .as_ref()
        .map(|value| matches!(value, TimeValue::Date(_)));
    partial.start = start;
    partial.end = end;

    let summary = text_value(properties, "SUMMARY");
    let (title, body) = split_title_body(summary.as_deref(), None);
    partial.title = title;
    partial.body = body;
    partial.location = text_value(properties, "LOCATION");
    partial.detail_url = text_value(properties, "URL").and_then(|href| absolutize(&href, None));
    partial.meeting_id = text_value(properties, "UID");
    partial.keyed()
}

fn property<'a>(properties: &'a [Property], name: &str) -> Option<&'a Property> {
    properties
        .iter()
        .find(|prop| prop.name.eq_ignore_ascii_case(name))
}

fn param<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

fn text_value(properties: &[Property], name: &str) -> Option<String> {
    property(properties, name)?
        .value
        .as_deref()
        .map(unescape)
        .and_then(|text| clean(&text))
}

/// DTSTART/DTEND: UTC with `Z`, zoned with `TZID`, all-day with `VALUE=DATE`.
fn ics_time(prop: &Property) -> Option<TimeValue> {
    let value = prop.value.as_deref()?.trim();
    if value.is_empty() {
        return None;
    }
    let is_date = param(prop, "VALUE").is_some_and(|kind| kind.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|byte| byte.is_ascii_digit()));
    if is_date {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(TimeValue::Date);
    }
    if let Some(tzid) = param(prop, "TZID") {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
            return Some(TimeValue::Local {
                datetime,
                tzname: Some(tzid.trim_matches('"').to_string()),
            });
        }
    }
    Some(parse_time_text(value).unwrap_or_else(|| TimeValue::Text(value.to_string())))
}

fn parse_duration(text: &str) -> Option<Duration> {
    let caps = ICS_DURATION.captures(text.trim())?;
    let part = |index: usize| -> Option<i64> {
        match caps.get(index) {
            Some(found) => found.as_str().parse().ok(),
            None => Some(0),
        }
    };
    let total = [
        Duration::try_weeks(part(2)?)?,
        Duration::try_days(part(3)?)?,
        Duration::try_hours(part(4)?)?,
        Duration::try_minutes(part(5)?)?,
        Duration::try_seconds(part(6)?)?,
    ]
    .into_iter()
    .try_fold(Duration::zero(), |sum, piece| sum.checked_add(&piece))?;
    Some(if caps.get(1).is_some_and(|sign| sign.as_str() == "-") {
        -total
    } else {
        total
    })
}

/// `None` when the shifted value leaves chrono's range.
fn shift(start: &TimeValue, by: Duration) -> Option<TimeValue> {
    match start {
        TimeValue::Instant(at) => at.checked_add_signed(by).map(TimeValue::Instant),
        TimeValue::Local { datetime, tzname } => {
            datetime
                .checked_add_signed(by)
                .map(|datetime| TimeValue::Local {
                    datetime,
                    tzname: tzname.clone(),
                })
        }
        TimeValue::Date(day) => day
            .checked_add_signed(Duration::try_days(by.num_days())?)
            .map(TimeValue::Date),
        TimeValue::Text(_) => None,
    }
}

fn unescape(text: &str) -> String {
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

fn unparsable(reason: impl Into<String>) -> UnparsableSourceError {
    UnparsableSourceError::new(SourceKind::Ics, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MEETING_ICS: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//eScribe//Meetings//EN\r\n\
BEGIN:VEVENT\r\n\
UID:b2f1-detroit\r\n\
DTSTART;TZID=America/Detroit:20251105T100000\r\n\
DTEND;TZID=America/Detroit:20251105T120000\r\n\
SUMMARY:Formal Session of City Council\r\n\
LOCATION:Erma L. Henderson Auditorium\\, 13th Floor\r\n\
URL:https://pub-detroitmi.escribemeetings.com/Meeting.aspx?Id=b2f1\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn zoned_event() {
        let partial = parse_ics_event(MEETING_ICS).unwrap();
        assert_eq!(partial.source_kind, SourceKind::Ics);
        assert_eq!(
            partial.start,
            Some(TimeValue::Local {
                datetime: NaiveDateTime::parse_from_str("2025-11-05 10:00", "%Y-%m-%d %H:%M").unwrap(),
                tzname: Some("America/Detroit".to_string()),
            })
        );
        assert!(matches!(partial.end, Some(TimeValue::Local { .. })));
        assert_eq!(partial.all_day, Some(false));
        assert_eq!(partial.body.as_deref(), Some("Formal Session of City Council"));
        assert_eq!(
            partial.location.as_deref(),
            Some("Erma L. Henderson Auditorium, 13th Floor")
        );
        assert_eq!(
            partial.detail_url.as_deref(),
            Some("https://pub-detroitmi.escribemeetings.com/Meeting.aspx?Id=b2f1")
        );
    }

    #[test]
    fn bare_vevent_with_utc_times_and_duration() {
        let payload = "BEGIN:VEVENT\nDTSTART:20251211T150000Z\nDURATION:PT1H30M\nSUMMARY:Finance Committee\nEND:VEVENT";
        let partial = parse_ics_event(payload).unwrap();
        let Some(TimeValue::Instant(start)) = partial.start else {
            panic!("expected instant start");
        };
        let Some(TimeValue::Instant(end)) = partial.end else {
            panic!("expected instant end");
        };
        assert_eq!(end - start, Duration::minutes(90));
    }

    #[test]
    fn out_of_range_duration_leaves_end_open() {
        for duration in ["P99999999999999W", "P99999999D"] {
            let payload = format!(
                "BEGIN:VEVENT\nDTSTART:20251211T150000Z\nDURATION:{duration}\nSUMMARY:Finance Committee\nEND:VEVENT"
            );
            let partial = parse_ics_event(&payload).unwrap();
            assert!(matches!(partial.start, Some(TimeValue::Instant(_))));
            assert_eq!(partial.end, None, "{duration}");
        }
    }

    #[test]
    fn all_day_event() {
        let payload = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nDTSTART;VALUE=DATE:20251127\nDTEND;VALUE=DATE:20251128\nSUMMARY:Offices closed\nEND:VEVENT\nEND:VCALENDAR";
        let partial = parse_ics_event(payload).unwrap();
        assert_eq!(partial.all_day, Some(true));
        assert_eq!(
            partial.start,
            Some(TimeValue::Date(NaiveDate::from_ymd_opt(2025, 11, 27).unwrap()))
        );
    }

    #[test]
    fn missing_event_is_unparsable() {
        assert!(parse_ics_event("<html>Not found</html>").is_err());
        assert!(parse_ics_event("").is_err());
        let err = parse_ics_event("BEGIN:VCALENDAR\nVERSION:2.0\nEND:VCALENDAR").unwrap_err();
        assert_eq!(err.kind, SourceKind::Ics);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("PT2H"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(parse_duration("P1W"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("-PT15M"), Some(-Duration::minutes(15)));
        assert_eq!(parse_duration("two hours"), None);
        assert_eq!(parse_duration("P99999999999999W"), None);
        assert_eq!(parse_duration("PT99999999999999999999S"), None);
    }
}
