use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use meeting_core::{
    CrawlWindow, MeetingPayloads, PartialMeetingRecord, ReconcileConfig, Reconciler, RunInput,
    SourceKind, SourcePayload, TimeValue, compute_uid, run,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

const BASE: &str = "https://pub-detroitmi.escribemeetings.com/";

fn reconciler() -> Reconciler {
    Reconciler::new(&ReconcileConfig::default()).unwrap()
}

fn local(text: &str) -> TimeValue {
    TimeValue::Local {
        datetime: NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M").unwrap(),
        tzname: None,
    }
}

fn instant(text: &str) -> TimeValue {
    TimeValue::Instant(DateTime::parse_from_rfc3339(text).unwrap())
}

fn listing_entry() -> PartialMeetingRecord {
    let mut partial = PartialMeetingRecord::new(SourceKind::Listing);
    partial.meeting_id = Some("b2f1".to_string());
    partial.title = Some("Formal Session".to_string());
    partial.body = Some("City Council".to_string());
    partial.start = Some(local("2025-11-05 10:00"));
    partial.keyed()
}

fn ics_event() -> PartialMeetingRecord {
    let mut partial = PartialMeetingRecord::new(SourceKind::Ics);
    partial.meeting_id = Some("b2f1".to_string());
    partial.start = Some(instant("2025-11-05T10:00:00-05:00"));
    partial.end = Some(instant("2025-11-05T12:00:00-05:00"));
    partial.location = Some("CAYMC".to_string());
    partial.keyed()
}

fn detail_page() -> PartialMeetingRecord {
    let mut partial = PartialMeetingRecord::new(SourceKind::Detail);
    partial.meeting_id = Some("b2f1".to_string());
    partial.detail_url = Some(format!("{BASE}Meeting.aspx?Id=b2f1"));
    partial.agenda_url = Some(format!("{BASE}FileStream.ashx?DocumentId=9001"));
    partial.virtual_link = Some("https://cityofdetroit.zoom.us/j/85846903626".to_string());
    partial.location = Some("Erma L. Henderson Auditorium, 13th Floor".to_string());
    partial.keyed()
}

#[test]
fn scenario_a_ics_time_beats_listing_time() {
    let record = reconciler().merge(&[listing_entry(), ics_event()]).unwrap();
    assert_eq!(record.start.to_rfc3339(), "2025-11-05T10:00:00-05:00");
    assert_eq!(record.end.to_rfc3339(), "2025-11-05T12:00:00-05:00");
    assert_eq!(record.provenance.time, Some(SourceKind::Ics));
}

#[test]
fn scenario_b_listing_only_gets_two_hour_default() {
    let record = reconciler().merge(&[listing_entry()]).unwrap();
    assert_eq!(record.end - record.start, Duration::hours(2));
    assert!(!record.all_day);
    assert!(record.provenance.end_estimated);
}

#[test]
fn scenario_c_links_come_from_detail_page() {
    let record = reconciler().merge(&[listing_entry(), detail_page()]).unwrap();
    assert_eq!(record.agenda_url, format!("{BASE}FileStream.ashx?DocumentId=9001"));
    assert_eq!(record.virtual_link, "https://cityofdetroit.zoom.us/j/85846903626");
    assert_eq!(record.provenance.links, Some(SourceKind::Detail));
}

fn listing_page(fetched_at: DateTime<Utc>) -> SourcePayload {
    SourcePayload {
        body: r#"{"d": [{"ID": "b2f1", "MeetingName": "Formal Session of City Council",
                         "StartDate": "2025-11-05T10:00:00", "Url": "Meeting.aspx?Id=b2f1"}]}"#
            .to_string(),
        url: None,
        fetched_at: Some(fetched_at),
    }
}

fn calendar(end: &str, fetched_at: DateTime<Utc>) -> SourcePayload {
    SourcePayload {
        body: format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:b2f1\r\n\
             DTSTART;TZID=America/Detroit:20251105T100000\r\n\
             DTEND;TZID=America/Detroit:{end}\r\nSUMMARY:Formal Session\r\n\
             LOCATION:CAYMC\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        ),
        url: None,
        fetched_at: Some(fetched_at),
    }
}

fn crawl(
    calendar_body: SourcePayload,
    detail: Option<SourcePayload>,
    prior: Vec<meeting_core::CanonicalMeetingRecord>,
) -> RunInput {
    let fetched_at = calendar_body.fetched_at.unwrap();
    RunInput {
        listing_pages: vec![listing_page(fetched_at)],
        meetings: vec![MeetingPayloads {
            meeting_id: Some("b2f1".to_string()),
            detail_url: Some(format!("{BASE}Meeting.aspx?Id=b2f1")),
            calendar: Some(calendar_body),
            detail,
            documents: Vec::new(),
        }],
        prior,
    }
}

#[test]
fn scenario_d_later_crawl_updates_end_time() {
    let config = ReconcileConfig::default();
    let first_day = Utc.with_ymd_and_hms(2025, 10, 15, 6, 0, 0).unwrap();
    let ahead = CrawlWindow::around(NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(), 0, 2);
    let first = run(&config, crawl(calendar("20251105T120000", first_day), None, Vec::new()), Some(ahead))
        .unwrap();
    assert_eq!(first.meetings.len(), 1);
    assert_eq!(first.meetings[0].end.to_rfc3339(), "2025-11-05T12:00:00-05:00");

    let second_day = Utc.with_ymd_and_hms(2025, 12, 2, 6, 0, 0).unwrap();
    let behind = CrawlWindow::around(NaiveDate::from_ymd_opt(2025, 12, 2).unwrap(), 1, 0);
    let second = run(
        &config,
        crawl(calendar("20251105T133000", second_day), None, first.meetings.clone()),
        Some(behind),
    )
    .unwrap();
    assert_eq!(second.meetings.len(), 1);
    assert_eq!(second.meetings[0].uid, first.meetings[0].uid);
    assert_eq!(second.meetings[0].end.to_rfc3339(), "2025-11-05T13:30:00-05:00");
    assert_eq!(second.meetings[0].observed_at, Some(second_day));
}

#[test]
fn scenario_e_malformed_detail_is_isolated() {
    let fetched_at = Utc.with_ymd_and_hms(2025, 11, 1, 6, 0, 0).unwrap();
    let broken = SourcePayload {
        body: String::new(),
        url: Some(format!("{BASE}Meeting.aspx?Id=b2f1")),
        fetched_at: Some(fetched_at),
    };
    let report = run(
        &ReconcileConfig::default(),
        crawl(calendar("20251105T120000", fetched_at), Some(broken), Vec::new()),
        None,
    )
    .unwrap();
    assert_eq!(report.meetings.len(), 1);
    let meeting = &report.meetings[0];
    assert_eq!(meeting.title, "Meeting");
    assert_eq!(meeting.body, "Formal Session of City Council");
    assert_eq!(meeting.location, "CAYMC");
    assert_eq!(meeting.end.to_rfc3339(), "2025-11-05T12:00:00-05:00");
    assert_eq!(report.source_failures.len(), 1);
    assert_eq!(report.source_failures[0].kind, SourceKind::Detail);
}

fn permutations(items: &[PartialMeetingRecord]) -> Vec<Vec<PartialMeetingRecord>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for index in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(index);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

#[test]
fn merge_is_order_independent() {
    let mut stale_ics = ics_event();
    stale_ics.end = Some(instant("2025-11-05T11:00:00-05:00"));
    stale_ics.fetched_at = Some(Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap());
    let mut fresh_ics = ics_event();
    fresh_ics.fetched_at = Some(Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap());

    let partials = [listing_entry(), stale_ics, fresh_ics, detail_page()];
    let orders = permutations(&partials);
    assert_eq!(orders.len(), 24);
    let expected = reconciler().merge(&partials).unwrap();
    for order in orders {
        assert_eq!(reconciler().merge(&order).unwrap(), expected);
    }
    assert_eq!(expected.end.to_rfc3339(), "2025-11-05T12:00:00-05:00");
}

#[test]
fn ics_time_survives_listing_merged_last() {
    let mut listing = listing_entry();
    listing.start = Some(local("2025-11-05 09:00"));
    listing.end = Some(local("2025-11-05 17:00"));
    listing.fetched_at = Some(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
    let record = reconciler().merge(&[ics_event(), listing]).unwrap();
    assert_eq!(record.start.to_rfc3339(), "2025-11-05T10:00:00-05:00");
    assert_eq!(record.end.to_rfc3339(), "2025-11-05T12:00:00-05:00");
}

#[test]
fn uid_tracks_identifying_content_only() {
    let base = reconciler().merge(&[listing_entry()]).unwrap();

    let mut relocated = listing_entry();
    relocated.location = Some("Virtual".to_string());
    assert_eq!(reconciler().merge(&[relocated]).unwrap().uid, base.uid);

    let mut moved = listing_entry();
    moved.start = Some(local("2025-11-06 10:00"));
    assert_ne!(reconciler().merge(&[moved]).unwrap().uid, base.uid);

    assert_eq!(
        base.uid,
        compute_uid("Formal Session", "City Council", base.start, "", "escribe-detroit")
    );
}

#[test]
fn collection_has_unique_uids_and_valid_times() {
    let fetched_at = Utc.with_ymd_and_hms(2025, 11, 1, 6, 0, 0).unwrap();
    let month_view = SourcePayload {
        body: format!(
            r#"<html><body>
                 <a href="{BASE}Meeting.aspx?Id=b2f1">Formal Session of City Council</a>
                 <a href="Meeting.aspx?Id=c3d4">Public Health and Safety Standing Committee</a>
               </body></html>"#
        ),
        url: None,
        fetched_at: Some(fetched_at),
    };
    let mut input = crawl(calendar("20251105T120000", fetched_at), None, Vec::new());
    input.listing_pages.push(listing_page(fetched_at));
    input.listing_pages.push(month_view);

    let first = run(&ReconcileConfig::default(), input.clone(), None).unwrap();
    input.prior = first.meetings.clone();
    let again = run(&ReconcileConfig::default(), input, None).unwrap();

    for report in [&first, &again] {
        let uids: BTreeSet<_> = report.meetings.iter().map(|m| m.uid.as_str()).collect();
        assert_eq!(uids.len(), report.meetings.len());
        for meeting in &report.meetings {
            assert!(meeting.end > meeting.start);
        }
    }
    assert_eq!(again.meetings, first.meetings);
    // c3d4 has no start anywhere and is reported, not emitted.
    assert_eq!(first.dropped.len(), 1);
}
