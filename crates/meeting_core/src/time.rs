//! Time normalization: source timestamps in, zone-aware start/end out.

use crate::config::parse_zone;
use crate::error::TimeError;
use crate::schema::TimeValue;
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedTime {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub all_day: bool,
    pub end_estimated: bool,
}

/// A time value pinned to a zone, or a bare date for all-day events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    At(DateTime<Tz>),
    Day(NaiveDate),
}

/// Normalizes `start`/`end` into `tzname`. See [`normalize_in`].
pub fn normalize(
    start: &TimeValue,
    end: Option<&TimeValue>,
    tzname: &str,
    fallback: Duration,
) -> Result<NormalizedTime, TimeError> {
    normalize_in(start, end, parse_zone(tzname)?, fallback)
}

/// Explicit offsets are trusted and converted into `tz` for display; naive
/// values are placed in their own named zone when known, else in `tz`.
/// A missing end, or one not after start, becomes `start + fallback`
/// (next midnight for all-day events).
pub fn normalize_in(
    start: &TimeValue,
    end: Option<&TimeValue>,
    tz: Tz,
    fallback: Duration,
) -> Result<NormalizedTime, TimeError> {
    let resolved_start = resolve(start, tz)?;
    // An unparsable end is treated like a missing one.
    let resolved_end = end.and_then(|value| resolve(value, tz).ok());

    let (start_at, all_day) = match resolved_start {
        Resolved::At(at) => (at, false),
        Resolved::Day(day) => (local_midnight(day, tz), true),
    };

    let explicit_end = resolved_end.map(|value| match value {
        Resolved::At(at) => at,
        Resolved::Day(day) => local_midnight(day, tz),
    });

    // All-day events keep whole days even when a source supplies a clock time.
    let (end_at, end_estimated) = match explicit_end {
        Some(candidate) if candidate > start_at && all_day => {
            (midnight_on_or_after(candidate, tz), false)
        }
        Some(candidate) if candidate > start_at => (Some(candidate), false),
        _ if all_day => (next_midnight(start_at.date_naive(), tz), true),
        _ => (start_at.checked_add_signed(fallback), true),
    };
    let end_at = end_at.ok_or_else(|| {
        TimeError::InvalidTime(format!("no representable end after {start_at}"))
    })?;

    Ok(NormalizedTime {
        start: start_at.fixed_offset(),
        end: end_at.fixed_offset(),
        all_day,
        end_estimated,
    })
}

/// Forces a normalized time onto whole days in `tz`.
pub fn to_all_day(time: NormalizedTime, tz: Tz) -> NormalizedTime {
    let first = time.start.with_timezone(&tz).date_naive();
    let mut last = time.end.with_timezone(&tz).date_naive();
    if time.end.with_timezone(&tz).time() != NaiveTime::MIN || last <= first {
        last = last.succ_opt().unwrap_or(last);
    }
    let last = last.max(first.succ_opt().unwrap_or(first));
    NormalizedTime {
        start: local_midnight(first, tz).fixed_offset(),
        end: local_midnight(last, tz).fixed_offset(),
        all_day: true,
        end_estimated: time.end_estimated,
    }
}

fn resolve(value: &TimeValue, tz: Tz) -> Result<Resolved, TimeError> {
    match value {
        TimeValue::Instant(at) => Ok(Resolved::At(at.with_timezone(&tz))),
        TimeValue::Local { datetime, tzname } => {
            let zone = tzname
                .as_deref()
                .and_then(|name| parse_zone(name).ok())
                .unwrap_or(tz);
            Ok(Resolved::At(localize(*datetime, zone).with_timezone(&tz)))
        }
        TimeValue::Date(day) => Ok(Resolved::Day(*day)),
        TimeValue::Text(text) => match parse_time_text(text) {
            Some(TimeValue::Text(_)) | None => Err(TimeError::InvalidTime(format!(
                "unrecognized time text {text:?}"
            ))),
            Some(parsed) => resolve(&parsed, tz),
        },
    }
}

/// Places a wall-clock time in `tz`. Ambiguous times take the earlier
/// instant; times inside a spring-forward gap move one hour later.
pub fn localize(datetime: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    tz.from_local_datetime(&datetime)
        .earliest()
        .or_else(|| {
            let later = datetime.checked_add_signed(Duration::hours(1))?;
            tz.from_local_datetime(&later).earliest()
        })
        .unwrap_or_else(|| tz.from_utc_datetime(&datetime))
}

fn local_midnight(day: NaiveDate, tz: Tz) -> DateTime<Tz> {
    localize(day.and_time(NaiveTime::MIN), tz)
}

fn next_midnight(day: NaiveDate, tz: Tz) -> Option<DateTime<Tz>> {
    day.succ_opt().map(|next| local_midnight(next, tz))
}

fn midnight_on_or_after(at: DateTime<Tz>, tz: Tz) -> Option<DateTime<Tz>> {
    if at.time() == NaiveTime::MIN {
        Some(at)
    } else {
        next_midnight(at.date_naive(), tz)
    }
}

static MONTH_ABBREVIATION_DOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec)t?\.\s").unwrap()
});

static ESCRIBE_EPOCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/Date\((-?\d+)([+-]\d{4})?\)/$").unwrap());

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%dT%H:%M:%S%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y%m%dT%H%M%S",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%B %d %Y %I:%M %p",
    "%b %d %Y %I:%M %p",
    "%B %d %Y %H:%M",
    "%A %B %d %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d %Y"];

/// Parses free-form timestamp text into a typed value; never returns
/// [`TimeValue::Text`].
pub fn parse_time_text(text: &str) -> Option<TimeValue> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = ESCRIBE_EPOCH.captures(&text) {
        let millis: i64 = caps[1].parse().ok()?;
        let at = DateTime::<Utc>::from_timestamp_millis(millis)?;
        return Some(TimeValue::Instant(at.fixed_offset()));
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(&text) {
        return Some(TimeValue::Instant(at));
    }
    if let Some(stripped) = text.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S") {
            return Some(TimeValue::Instant(naive.and_utc().fixed_offset()));
        }
    }
    for format in OFFSET_FORMATS {
        if let Ok(at) = DateTime::parse_from_str(&text, format) {
            return Some(TimeValue::Instant(at));
        }
    }

    // "November 5, 2025, 10:00 am" -> "November 5 2025 10:00 AM"
    let relaxed = text.replace(',', " ").split_whitespace().collect::<Vec<_>>().join(" ");
    // "Nov. 5" and "Sept. 5" -> "Nov 5" and "Sep 5"
    let relaxed = MONTH_ABBREVIATION_DOT.replace_all(&relaxed, "$1 ").into_owned();
    let relaxed = relaxed
        .replace("a.m.", "AM")
        .replace("p.m.", "PM")
        .replace(" am", " AM")
        .replace(" pm", " PM");
    for format in NAIVE_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(&relaxed, format) {
            return Some(TimeValue::Local {
                datetime,
                tzname: None,
            });
        }
    }
    for format in DATE_FORMATS {
        if let Ok(day) = NaiveDate::parse_from_str(&relaxed, format) {
            return Some(TimeValue::Date(day));
        }
    }
    None
}
