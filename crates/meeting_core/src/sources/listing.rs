use super::links::{absolutize, meeting_id_from_url, parse_base};
use super::{clean, split_title_body};
use crate::error::UnparsableSourceError;
use crate::schema::{PartialMeetingRecord, PublishedFile, SourceKind, TimeValue};
use crate::time::parse_time_text;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// CivicClerk writes this when a meeting has no recorded end.
const UNKNOWN_END_SENTINEL: &str = "1900-01-01";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub entries: Vec<PartialMeetingRecord>,
    pub next_page: Option<String>, // OData continuation, for the fetch layer
    pub skipped: usize,
}

/// Parses one crawl-window page: CivicClerk OData JSON, eScribe AJAX JSON,
/// or an eScribe month-view HTML page.
pub fn parse_listing_page(
    payload: &str,
    portal_base: &str,
) -> Result<ListingPage, UnparsableSourceError> {
    let trimmed = payload.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(unparsable("empty payload"));
    }
    let base = parse_base(portal_base);

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|err| unparsable(format!("invalid JSON: {err}")))?;
        return parse_json_page(&value, base.as_ref());
    }
    if trimmed.starts_with('<') {
        return Ok(parse_month_html(trimmed, base.as_ref()));
    }
    Err(unparsable("payload is neither JSON nor markup"))
}

fn parse_json_page(value: &Value, base: Option<&Url>) -> Result<ListingPage, UnparsableSourceError> {
    let (items, next_page) = match value {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(map) => {
            let next_page = map
                .get("@odata.nextLink")
                .and_then(Value::as_str)
                .map(str::to_string);
            match (map.get("value"), map.get("d")) {
                (Some(Value::Array(items)), _) => (items.as_slice(), next_page),
                (_, Some(Value::Array(items))) => (items.as_slice(), next_page),
                // ASP.NET services sometimes double-encode the payload.
                (_, Some(Value::String(inner))) => {
                    let inner: Value = serde_json::from_str(inner)
                        .map_err(|err| unparsable(format!("invalid wrapped JSON: {err}")))?;
                    return parse_json_page(&inner, base);
                }
                _ if looks_like_entry(value) => (std::slice::from_ref(value), next_page),
                _ => return Err(unparsable("JSON object has no event list")),
            }
        }
        _ => return Err(unparsable("JSON payload is not an object or array")),
    };

    let mut page = ListingPage {
        next_page,
        ..ListingPage::default()
    };
    for item in items {
        match parse_listing_entry(item, base) {
            Ok(entry) => page.entries.push(entry),
            Err(err) => {
                debug!(error = %err, "skipping listing entry");
                page.skipped += 1;
            }
        }
    }
    Ok(page)
}

fn looks_like_entry(value: &Value) -> bool {
    ["eventName", "eventDate", "MeetingName", "StartDate"]
        .iter()
        .any(|key| value.get(key).is_some())
}

/// Shallow fields of one listing entry (CivicClerk event or eScribe meeting).
pub fn parse_listing_entry(
    entry: &Value,
    base: Option<&Url>,
) -> Result<PartialMeetingRecord, UnparsableSourceError> {
    if !entry.is_object() {
        return Err(unparsable("listing entry is not an object"));
    }
    let partial = if entry.get("eventName").is_some() || entry.get("eventDate").is_some() {
        civicclerk_entry(entry, base)
    } else {
        escribe_entry(entry, base)
    };
    if partial.meeting_id.is_none() && partial.detail_url.is_none() && partial.start.is_none() {
        return Err(unparsable("entry has no id, link or date"));
    }
    Ok(partial.keyed())
}

fn civicclerk_entry(entry: &Value, base: Option<&Url>) -> PartialMeetingRecord {
    let mut partial = PartialMeetingRecord::new(SourceKind::Listing);
    partial.meeting_id = scalar(entry, &["id"]);

    let event_name = scalar(entry, &["eventName"]).and_then(|name| clean(&name));
    let category = scalar(entry, &["categoryName"]).and_then(|name| clean(&name));
    let body = category.clone().or_else(|| event_name.clone());
    let title = match (&event_name, &body) {
        (Some(name), Some(body)) if !name.eq_ignore_ascii_case(body) => Some(name.clone()),
        _ => Some("Meeting".to_string()),
    };
    partial.title = title;
    partial.body = body;

    partial.start = scalar(entry, &["eventDate"]).map(|text| typed_time(&text));
    partial.end = scalar(entry, &["meetingEndTime"])
        .filter(|text| !text.starts_with(UNKNOWN_END_SENTINEL))
        .map(|text| typed_time(&text));

    if let Some(location) = entry.get("eventLocation") {
        let parts: Vec<String> = ["address1", "address2", "city", "state", "zipCode"]
            .iter()
            .filter_map(|key| scalar(location, &[*key]))
            .filter_map(|part| clean(&part))
            .collect();
        partial.location = (!parts.is_empty()).then(|| parts.join(", "));
    }
    partial.address = scalar(entry, &["eventDescription"]).and_then(|text| clean(&text));

    for file in entry
        .get("publishedFiles")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(url) = scalar(file, &["url", "streamUrl"]).and_then(|href| absolutize(&href, base))
        else {
            continue;
        };
        let kind = scalar(file, &["type"]).unwrap_or_default();
        if kind.eq_ignore_ascii_case("agenda") && partial.agenda_url.is_none() {
            partial.agenda_url = Some(url.clone());
        } else if kind.eq_ignore_ascii_case("minutes") && partial.minutes_url.is_none() {
            partial.minutes_url = Some(url.clone());
        }
        partial.published_files.push(PublishedFile {
            kind,
            name: scalar(file, &["name"]).unwrap_or_default(),
            url,
        });
    }

    partial.virtual_link = scalar(entry, &["externalMediaUrl"]).and_then(|href| absolutize(&href, base));
    partial.detail_url = partial
        .meeting_id
        .as_ref()
        .and_then(|id| absolutize(&format!("event/{id}"), base));
    partial
}

fn escribe_entry(entry: &Value, base: Option<&Url>) -> PartialMeetingRecord {
    let mut partial = PartialMeetingRecord::new(SourceKind::Listing);
    partial.meeting_id = scalar(entry, &["ID", "Id", "id", "MeetingId"]);

    let name = scalar(entry, &["MeetingName", "Name", "Title"]);
    let body = scalar(entry, &["MeetingType", "CommitteeName"]);
    let (title, body) = split_title_body(name.as_deref(), body.as_deref());
    partial.title = title;
    partial.body = body;

    partial.start = scalar(entry, &["StartDate", "Start", "MeetingDate"]).map(|text| typed_time(&text));
    partial.end = scalar(entry, &["EndDate", "End"]).map(|text| typed_time(&text));
    partial.location = scalar(entry, &["Location", "Venue"]).and_then(|text| clean(&text));

    partial.detail_url = scalar(entry, &["Url", "Link", "MeetingUrl"])
        .and_then(|href| absolutize(&href, base))
        .or_else(|| {
            partial
                .meeting_id
                .as_ref()
                .and_then(|id| absolutize(&format!("Meeting.aspx?Id={id}"), base))
        });
    if partial.meeting_id.is_none() {
        partial.meeting_id = partial.detail_url.as_deref().and_then(meeting_id_from_url);
    }
    partial
}

fn parse_month_html(markup: &str, base: Option<&Url>) -> ListingPage {
    let document = Html::parse_document(markup);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return ListingPage::default();
    };

    // Keyed by detail URL: unique and in stable order.
    let mut found: BTreeMap<String, PartialMeetingRecord> = BTreeMap::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let lowered = href.to_lowercase();
        if !(lowered.contains("meeting?id=") || lowered.contains("meeting.aspx?id=")) {
            continue;
        }
        let Some(detail_url) = absolutize(href, base) else {
            continue;
        };
        let text = anchor.text().collect::<String>();
        let entry = found.entry(detail_url.clone()).or_insert_with(|| {
            let mut partial = PartialMeetingRecord::new(SourceKind::Listing);
            partial.meeting_id = meeting_id_from_url(&detail_url);
            partial.detail_url = Some(detail_url.clone());
            partial
        });
        // Several anchors may point at one meeting; the first named one wins.
        if entry.title.is_none() {
            let (title, body) = split_title_body(Some(&text), None);
            entry.title = title;
            entry.body = body;
        }
    }

    ListingPage {
        entries: found.into_values().map(PartialMeetingRecord::keyed).collect(),
        next_page: None,
        skipped: 0,
    }
}

fn typed_time(text: &str) -> TimeValue {
    parse_time_text(text).unwrap_or_else(|| TimeValue::Text(text.to_string()))
}

/// First present key rendered as a trimmed string (numbers included).
fn scalar(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn unparsable(reason: impl Into<String>) -> UnparsableSourceError {
    UnparsableSourceError::new(SourceKind::Listing, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NaturalKey;
    use pretty_assertions::assert_eq;

    const CIVICCLERK_BASE: &str = "https://macombcomi.portal.civicclerk.com/";

    #[test]
    fn civicclerk_odata_page() {
        let payload = r#"{
          "value": [
            {
              "id": 1742,
              "eventName": "Board of Commissioners",
              "categoryName": "Board of Commissioners",
              "eventDescription": "Commission Chambers, 9th Floor",
              "eventDate": "2025-12-11T15:00:00Z",
              "meetingEndTime": "1900-01-01T00:00:00Z",
              "eventLocation": {"address1": "1 S Main St", "city": "Mount Clemens", "state": "MI", "zipCode": "48043"},
              "publishedFiles": [
                {"type": "Agenda", "name": "Agenda", "url": "/files/agenda-1742.pdf"},
                {"type": "Agenda Packet", "name": "Packet", "url": "/files/packet-1742.pdf"},
                {"type": "Minutes", "name": "Minutes", "url": "https://cdn.example.com/minutes-1742.pdf"}
              ]
            },
            {"eventName": "orphan without id or date"}
          ],
          "@odata.nextLink": "https://macombcomi.api.civicclerk.com/v1/Events?$skip=100"
        }"#;
        let page = parse_listing_page(payload, CIVICCLERK_BASE).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.skipped, 1);
        assert_eq!(
            page.next_page.as_deref(),
            Some("https://macombcomi.api.civicclerk.com/v1/Events?$skip=100")
        );

        let entry = &page.entries[0];
        assert_eq!(entry.natural_key, NaturalKey::from_meeting_id("1742"));
        assert_eq!(entry.title.as_deref(), Some("Meeting"));
        assert_eq!(entry.body.as_deref(), Some("Board of Commissioners"));
        assert!(matches!(entry.start, Some(TimeValue::Instant(_))));
        assert_eq!(entry.end, None);
        assert_eq!(
            entry.location.as_deref(),
            Some("1 S Main St, Mount Clemens, MI, 48043")
        );
        assert_eq!(entry.address.as_deref(), Some("Commission Chambers, 9th Floor"));
        assert_eq!(
            entry.agenda_url.as_deref(),
            Some("https://macombcomi.portal.civicclerk.com/files/agenda-1742.pdf")
        );
        assert_eq!(
            entry.minutes_url.as_deref(),
            Some("https://cdn.example.com/minutes-1742.pdf")
        );
        assert_eq!(entry.published_files.len(), 3);
        assert_eq!(
            entry.detail_url.as_deref(),
            Some("https://macombcomi.portal.civicclerk.com/event/1742")
        );
    }

    #[test]
    fn escribe_month_html_collects_unique_detail_links() {
        let payload = r#"
          <html><body>
            <div class="calendar-item">
              <a href="Meeting.aspx?Id=b2f1&Agenda=Agenda&lang=English">Formal Session of City Council</a>
              <a href="Meeting.aspx?Id=b2f1&Agenda=Agenda&lang=English">Details</a>
            </div>
            <a href="https://pub-detroitmi.escribemeetings.com/Meeting?Id=a9c0">Budget Hearing</a>
            <a href="/Players/ISIStandAlonePlayer.aspx">Video</a>
          </body></html>"#;
        let page = parse_listing_page(payload, "https://pub-detroitmi.escribemeetings.com").unwrap();
        let urls: Vec<_> = page
            .entries
            .iter()
            .map(|entry| entry.detail_url.clone().unwrap())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://pub-detroitmi.escribemeetings.com/Meeting.aspx?Id=b2f1&Agenda=Agenda&lang=English",
                "https://pub-detroitmi.escribemeetings.com/Meeting?Id=a9c0",
            ]
        );
        assert_eq!(page.entries[0].meeting_id.as_deref(), Some("b2f1"));
        assert_eq!(page.entries[0].title.as_deref(), Some("Meeting"));
        assert_eq!(
            page.entries[0].body.as_deref(),
            Some("Formal Session of City Council")
        );
        assert_eq!(page.entries[1].title.as_deref(), Some("Budget Hearing"));
    }

    #[test]
    fn escribe_ajax_wrapper() {
        let payload = r#"{"d": [{"ID": "c3d4", "MeetingName": "Public Health and Safety Standing Committee",
                               "StartDate": "2025/11/05 10:00:00", "EndDate": "2025/11/05 12:00:00",
                               "Location": "Committee of the Whole Room"}]}"#;
        let page = parse_listing_page(payload, "https://pub-detroitmi.escribemeetings.com/").unwrap();
        let entry = &page.entries[0];
        assert_eq!(entry.meeting_id.as_deref(), Some("c3d4"));
        assert_eq!(
            entry.body.as_deref(),
            Some("Public Health and Safety Standing Committee")
        );
        assert!(matches!(entry.start, Some(TimeValue::Local { .. })));
        assert_eq!(
            entry.detail_url.as_deref(),
            Some("https://pub-detroitmi.escribemeetings.com/Meeting.aspx?Id=c3d4")
        );
    }

    #[test]
    fn wrong_shapes_are_unparsable() {
        for payload in ["", "   ", "42", "\"text\"", "plain words", "{\"status\": \"ok\"}", "{broken"] {
            let err = parse_listing_page(payload, CIVICCLERK_BASE).unwrap_err();
            assert_eq!(err.kind, SourceKind::Listing, "{payload}");
        }
    }

    #[test]
    fn html_month_without_meetings_is_an_empty_page() {
        let page = parse_listing_page("<html><body>No meetings</body></html>", CIVICCLERK_BASE).unwrap();
        assert!(page.entries.is_empty());
    }
}
