//! Field-level merge of one meeting's partial records.
//!
//! Every field group is read from the partials in a fixed order: authority
//! rank first, then freshness, then a content fingerprint. The first
//! non-empty value wins, so the result does not depend on input order.

use crate::config::{AuthorityTable, FieldGroup, ReconcileConfig, TieBreak};
use crate::error::{ReconcileError, TimeError};
use crate::schema::{
    CanonicalMeetingRecord, NaturalKey, PartialMeetingRecord, Provenance, SourceKind,
};
use crate::sources::links::sanitize;
use crate::time::{NormalizedTime, normalize_in, to_all_day};
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use chrono_tz::Tz;
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_TITLE: &str = "Meeting";

#[derive(Debug, Clone)]
pub struct Reconciler {
    tz: Tz,
    timezone: String,
    fallback: Duration,
    source_id: String,
    tie_break: TieBreak,
    authority: AuthorityTable,
}

impl Reconciler {
    pub fn new(config: &ReconcileConfig) -> Result<Self, TimeError> {
        Ok(Self {
            tz: config.zone()?,
            timezone: config.timezone.trim().to_string(),
            fallback: config.fallback_duration()?,
            source_id: config.source_id.clone(),
            tie_break: config.tie_break,
            authority: config.authority.clone(),
        })
    }

    pub fn zone(&self) -> Tz {
        self.tz
    }

    /// Merges the partials of one logical meeting.
    pub fn merge(
        &self,
        partials: &[PartialMeetingRecord],
    ) -> Result<CanonicalMeetingRecord, ReconcileError> {
        if partials.is_empty() {
            return Err(ReconcileError::NoSources);
        }
        let mut provenance = Provenance::default();

        let by_time = self.ordered(partials, FieldGroup::Time);
        let (time, time_source) = self.resolve_time(&by_time)?;
        provenance.time = Some(time_source);
        provenance.end_estimated = time.end_estimated;

        let by_naming = self.ordered(partials, FieldGroup::Naming);
        let title = first_text(&by_naming, |p| p.title.as_deref());
        let body = first_text(&by_naming, |p| p.body.as_deref());
        provenance.naming = title.as_ref().or(body.as_ref()).map(|(_, kind)| *kind);

        let by_location = self.ordered(partials, FieldGroup::Location);
        let location = first_text(&by_location, |p| p.location.as_deref());
        let address = first_text(&by_location, |p| p.address.as_deref());
        provenance.location = location.as_ref().or(address.as_ref()).map(|(_, kind)| *kind);

        let by_links = self.ordered(partials, FieldGroup::Links);
        let virtual_link = first_link(&by_links, |p| p.virtual_link.as_deref());
        let agenda_url = first_link(&by_links, |p| p.agenda_url.as_deref());
        let minutes_url = first_link(&by_links, |p| p.minutes_url.as_deref());
        let detail_url = first_link(&by_links, |p| p.detail_url.as_deref());
        provenance.links = [&virtual_link, &agenda_url, &minutes_url, &detail_url]
            .into_iter()
            .flatten()
            .map(|(_, kind)| *kind)
            .min_by_key(|kind| self.authority.rank(FieldGroup::Links, *kind));

        let meeting_id = first_text(&by_links, |p| p.meeting_id.as_deref()).map(|(id, _)| id);
        let published_files = first_list(&by_links, |p| &p.published_files);
        let agenda_items = first_list(&by_links, |p| &p.agenda_items);
        let votes = first_list(&by_links, |p| &p.votes);

        let title = title.map(|(text, _)| text).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let body = body.map(|(text, _)| text).unwrap_or_default();
        let detail_url = detail_url.map(|(url, _)| url).unwrap_or_default();
        let uid = compute_uid(&title, &body, time.start, &detail_url, &self.source_id);

        Ok(CanonicalMeetingRecord {
            uid,
            title,
            body,
            start: time.start,
            end: time.end,
            all_day: time.all_day,
            timezone: self.timezone.clone(),
            location: location.map(|(text, _)| text).unwrap_or_default(),
            address: address.map(|(text, _)| text).unwrap_or_default(),
            virtual_link: virtual_link.map(|(url, _)| url).unwrap_or_default(),
            agenda_url: agenda_url.map(|(url, _)| url).unwrap_or_default(),
            minutes_url: minutes_url.map(|(url, _)| url).unwrap_or_default(),
            detail_url,
            source: self.source_id.clone(),
            meeting_id,
            published_files,
            agenda_items,
            votes,
            observed_at: partials.iter().filter_map(|p| p.fetched_at).max(),
            provenance,
        })
    }

    /// Start from the first source whose start resolves; end from the first
    /// source whose end lands after that start.
    fn resolve_time(
        &self,
        ordered: &[&PartialMeetingRecord],
    ) -> Result<(NormalizedTime, SourceKind), ReconcileError> {
        let mut last_error = None;
        let mut chosen = None;
        for partial in ordered {
            let Some(start) = partial.start.as_ref() else {
                continue;
            };
            match normalize_in(start, None, self.tz, self.fallback) {
                Ok(time) => {
                    chosen = Some((partial.source_kind, start, time));
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        let Some((source, start, mut time)) = chosen else {
            let err = last_error
                .unwrap_or_else(|| TimeError::InvalidTime("no source supplied a start".to_string()));
            return Err(err.into());
        };
        for partial in ordered {
            let Some(end) = partial.end.as_ref() else {
                continue;
            };
            if let Ok(candidate) = normalize_in(start, Some(end), self.tz, self.fallback) {
                if !candidate.end_estimated {
                    time = candidate;
                    break;
                }
            }
        }

        let flagged_all_day = ordered.iter().find_map(|partial| partial.all_day);
        if flagged_all_day == Some(true) || time.all_day {
            time = to_all_day(time, self.tz);
        }
        Ok((time, source))
    }

    fn ordered<'a>(
        &self,
        partials: &'a [PartialMeetingRecord],
        group: FieldGroup,
    ) -> Vec<&'a PartialMeetingRecord> {
        let mut keyed: Vec<_> = partials
            .iter()
            .map(|partial| (self.authority.rank(group, partial.source_kind), fingerprint(partial), partial))
            .collect();
        keyed.sort_by(|(rank_a, print_a, a), (rank_b, print_b, b)| {
            rank_a
                .cmp(rank_b)
                .then_with(|| freshness(self.tie_break, a.fetched_at, b.fetched_at))
                .then_with(|| print_a.cmp(print_b))
        });
        keyed.into_iter().map(|(_, _, partial)| partial).collect()
    }
}

/// Orders two observation times so the preferred one sorts first.
/// Unknown fetch times always sort last.
pub fn freshness(
    tie_break: TieBreak,
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match tie_break {
            TieBreak::Freshest => b.cmp(&a),
            TieBreak::FirstSeen => a.cmp(&b),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn fingerprint(partial: &PartialMeetingRecord) -> String {
    serde_json::to_string(partial).unwrap_or_default()
}

fn first_text(
    ordered: &[&PartialMeetingRecord],
    get: impl Fn(&PartialMeetingRecord) -> Option<&str>,
) -> Option<(String, SourceKind)> {
    ordered.iter().find_map(|partial| {
        get(*partial)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| (text.to_string(), partial.source_kind))
    })
}

fn first_list<T: Clone>(
    ordered: &[&PartialMeetingRecord],
    get: impl Fn(&PartialMeetingRecord) -> &Vec<T>,
) -> Vec<T> {
    ordered
        .iter()
        .map(|partial| get(*partial))
        .find(|list| !list.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// First link that is absolute after sanitizing.
fn first_link(
    ordered: &[&PartialMeetingRecord],
    get: impl Fn(&PartialMeetingRecord) -> Option<&str>,
) -> Option<(String, SourceKind)> {
    ordered.iter().find_map(|partial| {
        let url = sanitize(get(*partial));
        (!url.is_empty()).then_some((url, partial.source_kind))
    })
}

/// `sha1("title|body|start|detail_url")@source_id`, start in UTC.
pub fn compute_uid(
    title: &str,
    body: &str,
    start: DateTime<FixedOffset>,
    detail_url: &str,
    source_id: &str,
) -> String {
    let start = start
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut hasher = Sha1::new();
    hasher.update(format!("{title}|{body}|{start}|{detail_url}").as_bytes());
    format!("{}@{}", hex::encode(hasher.finalize()), source_id)
}

/// Buckets partials by natural key, keeping input order inside a bucket.
pub fn group_by_natural_key(
    partials: impl IntoIterator<Item = PartialMeetingRecord>,
) -> BTreeMap<NaturalKey, Vec<PartialMeetingRecord>> {
    let mut groups: BTreeMap<NaturalKey, Vec<PartialMeetingRecord>> = BTreeMap::new();
    for partial in partials {
        groups
            .entry(partial.natural_key.clone())
            .or_default()
            .push(partial);
    }
    groups
}
