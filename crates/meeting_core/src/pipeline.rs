//! One reconciliation run over already-fetched payloads.

use crate::config::ReconcileConfig;
use crate::dedup::CollectionBuilder;
use crate::document::{DocumentExtraction, RawDocument, enrich, extract_document};
use crate::error::{DocumentExtractionWarning, DroppedMeeting, RunError, UnparsableSourceError};
use crate::reconcile::{Reconciler, group_by_natural_key};
use crate::schema::{CanonicalMeetingRecord, NaturalKey, PartialMeetingRecord, SourceKind};
use crate::sources::links::meeting_id_from_url;
use crate::sources::{parse_detail_page, parse_ics_event, parse_listing_page};
use crate::window::CrawlWindow;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A fetched payload as the fetch layer handed it over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePayload {
    pub body: String,
    pub url: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// The per-meeting fetches for one meeting found in a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingPayloads {
    pub meeting_id: Option<String>,
    pub detail_url: Option<String>,
    pub calendar: Option<SourcePayload>,
    pub detail: Option<SourcePayload>,
    pub documents: Vec<RawDocument>,
}

#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub listing_pages: Vec<SourcePayload>,
    pub meetings: Vec<MeetingPayloads>,
    /// Records emitted by earlier runs, re-merged with this run's.
    pub prior: Vec<CanonicalMeetingRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub meetings: Vec<CanonicalMeetingRecord>,
    pub dropped: Vec<DroppedMeeting>,
    pub source_failures: Vec<UnparsableSourceError>,
    pub document_warnings: Vec<DocumentExtractionWarning>,
    pub next_pages: Vec<String>,
}

#[derive(Default)]
struct Tally {
    offered: usize,
    parsed: usize,
}

pub fn run(
    config: &ReconcileConfig,
    input: RunInput,
    window: Option<CrawlWindow>,
) -> Result<RunReport, RunError> {
    let reconciler = Reconciler::new(config)?;
    let mut builder = CollectionBuilder::new(config)?;
    if let Some(window) = window {
        builder = builder.with_window(window);
    }

    let mut report = RunReport::default();
    let mut tally = Tally::default();
    let mut partials = Vec::new();

    for page in &input.listing_pages {
        tally.offered += 1;
        match parse_listing_page(&page.body, &config.portal_base) {
            Ok(listing) => {
                tally.parsed += 1;
                if listing.skipped > 0 {
                    debug!(skipped = listing.skipped, url = ?page.url, "listing entries skipped");
                }
                report.next_pages.extend(listing.next_page);
                partials.extend(listing.entries.into_iter().map(|mut entry| {
                    entry.fetched_at = page.fetched_at;
                    entry
                }));
            }
            Err(err) => {
                debug!(error = %err, url = ?page.url, "listing page contributed nothing");
                report.source_failures.push(err);
            }
        }
    }

    let mut documents: Vec<(NaturalKey, Vec<RawDocument>)> = Vec::new();
    for meeting in input.meetings {
        let parsed = parse_meeting(config, &meeting, &mut tally, &mut report.source_failures);
        let key = meeting_key(&meeting, &partials, &parsed);
        partials.extend(parsed.into_iter().map(|mut partial| {
            if let Some(key) = &key {
                partial.natural_key = key.clone();
            }
            partial
        }));
        if !meeting.documents.is_empty() {
            match key {
                Some(key) => documents.push((key, meeting.documents)),
                None => debug!("documents for an unidentified meeting ignored"),
            }
        }
    }

    if tally.parsed == 0 && input.prior.is_empty() {
        return Err(RunError::NoUsableInput {
            sources: tally.offered,
        });
    }

    let mut records = Vec::new();
    let mut uids: BTreeMap<NaturalKey, String> = BTreeMap::new();
    for (key, group) in group_by_natural_key(partials) {
        match reconciler.merge(&group) {
            Ok(record) => {
                uids.insert(key, record.uid.clone());
                records.push(record);
            }
            Err(err) => {
                warn!(key = %key, reason = %err, "meeting dropped");
                report.dropped.push(DroppedMeeting {
                    key,
                    reason: err.to_string(),
                });
            }
        }
    }

    if config.parse_documents {
        let mut extractions: BTreeMap<String, DocumentExtraction> = BTreeMap::new();
        for (key, raw) in documents {
            let target = uids.get(&key).cloned().unwrap_or_else(|| key.to_string());
            let extraction = extractions.entry(target).or_default();
            for document in &raw {
                extraction.absorb(extract_document(document));
            }
        }
        report.document_warnings = enrich(&mut records, extractions);
        for warning in &report.document_warnings {
            debug!(%warning, "document extraction");
        }
    } else if !documents.is_empty() {
        debug!(meetings = documents.len(), "document parsing disabled");
    }

    let merged = records.len();
    report.meetings = builder.build(records.into_iter().chain(input.prior));
    info!(
        sources = tally.offered,
        parsed = tally.parsed,
        merged,
        dropped = report.dropped.len(),
        meetings = report.meetings.len(),
        "reconciliation finished"
    );
    Ok(report)
}

/// Calendar and detail payloads of one meeting. A failing source is
/// recorded and contributes nothing.
fn parse_meeting(
    config: &ReconcileConfig,
    meeting: &MeetingPayloads,
    tally: &mut Tally,
    failures: &mut Vec<UnparsableSourceError>,
) -> Vec<PartialMeetingRecord> {
    let mut parsed = Vec::new();
    let mut record = |result: Result<PartialMeetingRecord, UnparsableSourceError>,
                      payload: &SourcePayload| {
        tally.offered += 1;
        match result {
            Ok(mut partial) => {
                tally.parsed += 1;
                partial.fetched_at = payload.fetched_at;
                parsed.push(partial);
            }
            Err(err) => {
                debug!(error = %err, url = ?payload.url, "source contributed nothing");
                failures.push(err);
            }
        }
    };

    if let Some(payload) = &meeting.calendar {
        let mut result = parse_ics_event(&payload.body);
        if let (Ok(partial), Some(id)) = (result.as_mut(), meeting.meeting_id.as_ref()) {
            // The event UID is only a fallback identifier.
            partial.meeting_id = Some(id.clone());
        }
        record(result, payload);
    }
    if let Some(payload) = &meeting.detail {
        let page_url = payload.url.as_deref().or(meeting.detail_url.as_deref());
        record(parse_detail_page(&payload.body, page_url, &config.portal_base), payload);
    }
    parsed
}

/// The natural key shared by every partial of this meeting: the portal id,
/// else a listing entry with the same detail URL, else a parsed source's key.
fn meeting_key(
    meeting: &MeetingPayloads,
    listing: &[PartialMeetingRecord],
    parsed: &[PartialMeetingRecord],
) -> Option<NaturalKey> {
    let id = meeting
        .meeting_id
        .clone()
        .or_else(|| meeting.detail_url.as_deref().and_then(meeting_id_from_url));
    if let Some(id) = id {
        return Some(NaturalKey::from_meeting_id(&id));
    }
    if let Some(url) = meeting.detail_url.as_deref() {
        let listed = listing
            .iter()
            .find(|entry| entry.detail_url.as_deref() == Some(url));
        if let Some(entry) = listed {
            return Some(entry.natural_key.clone());
        }
    }
    [SourceKind::Detail, SourceKind::Ics].iter().find_map(|kind| {
        parsed
            .iter()
            .find(|partial| partial.source_kind == *kind)
            .map(|partial| partial.natural_key.clone())
    })
}
