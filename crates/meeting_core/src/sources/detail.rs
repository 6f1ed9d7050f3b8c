use super::links::{absolutize, is_virtual_meeting_link, meeting_id_from_url, parse_base};
use super::{clean, split_title_body};
use crate::error::UnparsableSourceError;
use crate::schema::{PartialMeetingRecord, SourceKind, TimeValue};
use crate::time::parse_time_text;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

static MONTH_DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2},\s+\d{4})[,\s]+(?:at\s+)?(\d{1,2}:\d{2}\s*(?:[ap]\.?m\.?)?)(?:\s*(?:-|–|to)\s*(\d{1,2}:\d{2}\s*(?:[ap]\.?m\.?)?))?",
    )
    .unwrap()
});

static ISO_DATE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})[ T]+(\d{2}:\d{2})\b").unwrap());

static BREADCRUMB_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[›»>/|]").unwrap());

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static LABEL_CANDIDATES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, li, div, span, dd, td").unwrap());

static AGENDA_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)agenda").unwrap());
static MINUTES_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)minutes").unwrap());

/// Scrapes a meeting detail page. `page_url` (the fetched URL) anchors
/// relative links; `portal_base` is used when it is unknown.
pub fn parse_detail_page(
    markup: &str,
    page_url: Option<&str>,
    portal_base: &str,
) -> Result<PartialMeetingRecord, UnparsableSourceError> {
    let trimmed = markup.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(unparsable("empty payload"));
    }
    if !trimmed.starts_with('<') {
        return Err(unparsable("payload is not markup"));
    }

    let document = Html::parse_document(trimmed);
    let page_text = clean(&document.root_element().text().collect::<Vec<_>>().join(" "));
    let has_links = document.select(&ANCHORS).next().is_some();
    if page_text.is_none() && !has_links {
        return Err(unparsable("markup has no content"));
    }

    let page_url = page_url.and_then(|url| absolutize(url, None));
    let base = page_url
        .as_deref()
        .and_then(|url| Url::parse(url).ok())
        .or_else(|| parse_base(portal_base));

    let mut partial = PartialMeetingRecord::new(SourceKind::Detail);
    partial.detail_url = page_url.clone();
    partial.meeting_id = page_url.as_deref().and_then(meeting_id_from_url);

    let raw_title = first_text(&document, &["h1", ".meeting-title", ".page-title"]);
    let crumb_body = first_text(&document, &[".breadcrumb", "nav.breadcrumb"]).and_then(|crumb| {
        let parts: Vec<String> = BREADCRUMB_SPLIT
            .split(&crumb)
            .filter_map(clean)
            .collect();
        match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            len => parts.into_iter().nth(len - 2),
        }
    });
    let (title, body) = split_title_body(raw_title.as_deref(), crumb_body.as_deref());
    partial.title = title;
    partial.body = body;

    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(url) = absolutize(href, base.as_ref()) else {
            continue;
        };
        let text = anchor.text().collect::<String>();
        let lowered = href.to_lowercase();

        if partial.virtual_link.is_none() && is_virtual_meeting_link(href) {
            partial.virtual_link = Some(url.clone());
        }
        if partial.calendar_url.is_none()
            && (lowered.ends_with(".ics") || lowered.contains("addtocalendar"))
        {
            partial.calendar_url = Some(url.clone());
            continue;
        }
        if partial.agenda_url.is_none() && AGENDA_TEXT.is_match(&text) {
            partial.agenda_url = Some(url);
        } else if partial.minutes_url.is_none() && MINUTES_TEXT.is_match(&text) {
            partial.minutes_url = Some(url);
        }
    }

    partial.location = first_text(&document, &[".meeting-location", ".location", "[itemprop=location]"])
        .or_else(|| labelled_text(&document, "location"));
    partial.address = first_text(&document, &[".meeting-address", "[itemprop=address]"])
        .or_else(|| labelled_text(&document, "address"));

    if let Some(text) = page_text.as_deref() {
        let (start, end) = time_from_text(text);
        partial.start = start;
        partial.end = end;
    }

    Ok(partial.keyed())
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    clean(&element.text().collect::<Vec<_>>().join(" "))
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let parsed = Selector::parse(css).ok()?;
        document.select(&parsed).find_map(element_text)
    })
}

/// Text of the innermost element that starts with `label`, label removed.
fn labelled_text(document: &Html, label: &str) -> Option<String> {
    document
        .select(&LABEL_CANDIDATES)
        .filter_map(element_text)
        .filter(|text| text.len() < 300)
        .filter_map(|text| {
            let head = text.get(..label.len())?;
            if !head.eq_ignore_ascii_case(label) {
                return None;
            }
            let rest = text[label.len()..].trim_start_matches([':', '-', ' ']);
            clean(rest)
        })
        .min_by_key(String::len)
}

fn time_from_text(text: &str) -> (Option<TimeValue>, Option<TimeValue>) {
    if let Some(caps) = MONTH_DATE_TIME.captures(text) {
        let date = &caps[1];
        let start = parse_time_text(&format!("{date} {}", &caps[2]));
        let end = caps
            .get(3)
            .and_then(|end| parse_time_text(&format!("{date} {}", end.as_str())));
        if start.is_some() {
            return (start, end);
        }
    }
    if let Some(caps) = ISO_DATE_TIME.captures(text) {
        return (parse_time_text(&format!("{} {}", &caps[1], &caps[2])), None);
    }
    (None, None)
}

fn unparsable(reason: impl Into<String>) -> UnparsableSourceError {
    UnparsableSourceError::new(SourceKind::Detail, reason)
}
