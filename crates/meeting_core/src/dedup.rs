//! Collapses repeated observations of a meeting into one record per uid
//! and orders the collection.

use crate::config::{AuthorityTable, FieldGroup, ReconcileConfig, TieBreak};
use crate::error::TimeError;
use crate::reconcile::freshness;
use crate::schema::{CanonicalMeetingRecord, SourceKind};
use crate::window::CrawlWindow;
use chrono_tz::Tz;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CollectionBuilder {
    tz: Tz,
    tie_break: TieBreak,
    authority: AuthorityTable,
    window: Option<CrawlWindow>,
}

impl CollectionBuilder {
    pub fn new(config: &ReconcileConfig) -> Result<Self, TimeError> {
        Ok(Self {
            tz: config.zone()?,
            tie_break: config.tie_break,
            authority: config.authority.clone(),
            window: None,
        })
    }

    /// Restricts the collection to meetings whose local start date lies in
    /// `window`.
    pub fn with_window(mut self, window: CrawlWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn build(
        &self,
        records: impl IntoIterator<Item = CanonicalMeetingRecord>,
    ) -> Vec<CanonicalMeetingRecord> {
        let mut by_uid: BTreeMap<String, Vec<CanonicalMeetingRecord>> = BTreeMap::new();
        for record in records {
            by_uid.entry(record.uid.clone()).or_default().push(record);
        }

        let mut collection: Vec<_> = by_uid
            .into_values()
            .filter_map(|observations| self.collapse(observations))
            .filter(|record| self.in_window(record))
            .collect();
        collection.sort_by(collection_order);
        collection
    }

    fn in_window(&self, record: &CanonicalMeetingRecord) -> bool {
        let Some(window) = &self.window else {
            return true;
        };
        let date = record.start.with_timezone(&self.tz).date_naive();
        let keep = window.contains(date);
        if !keep {
            debug!(uid = %record.uid, %date, "outside crawl window");
        }
        keep
    }

    /// Re-applies field-group authority across observations of one uid,
    /// using each observation's provenance as its source kind.
    fn collapse(
        &self,
        observations: Vec<CanonicalMeetingRecord>,
    ) -> Option<CanonicalMeetingRecord> {
        if observations.len() == 1 {
            return observations.into_iter().next();
        }
        debug!(
            uid = %observations[0].uid,
            observations = observations.len(),
            "merging repeated observations"
        );

        let by_time = self.ordered(&observations, FieldGroup::Time, |r| r.provenance.time);
        let by_links = self.ordered(&observations, FieldGroup::Links, |r| r.provenance.links);
        let by_naming = self.ordered(&observations, FieldGroup::Naming, |r| r.provenance.naming);
        let by_location =
            self.ordered(&observations, FieldGroup::Location, |r| r.provenance.location);

        let winner = *by_time.first()?;
        let mut merged = winner.clone();

        // A measured end from an equally placed observation beats an estimate.
        if merged.provenance.end_estimated {
            if let Some(measured) = by_time
                .iter()
                .find(|record| !record.provenance.end_estimated && record.end > merged.start)
            {
                merged.end = measured.end;
                merged.provenance.end_estimated = false;
            }
        }

        let naming = by_naming.first().copied().unwrap_or(winner);
        merged.title = naming.title.clone();
        merged.body = naming.body.clone();
        merged.provenance.naming = naming.provenance.naming;

        merged.location = first_nonempty(&by_location, |r| &r.location);
        merged.address = first_nonempty(&by_location, |r| &r.address);
        merged.provenance.location = by_location
            .iter()
            .find(|r| !r.location.is_empty() || !r.address.is_empty())
            .and_then(|r| r.provenance.location);

        merged.virtual_link = first_nonempty(&by_links, |r| &r.virtual_link);
        merged.agenda_url = first_nonempty(&by_links, |r| &r.agenda_url);
        merged.minutes_url = first_nonempty(&by_links, |r| &r.minutes_url);
        merged.detail_url = first_nonempty(&by_links, |r| &r.detail_url);
        merged.provenance.links = by_links.first().and_then(|r| r.provenance.links);
        merged.meeting_id = by_links.iter().find_map(|r| r.meeting_id.clone());
        merged.published_files = first_list(&by_links, |r| &r.published_files);

        let by_freshness = self.ordered(&observations, FieldGroup::Time, |_| None);
        merged.agenda_items = first_list(&by_freshness, |r| &r.agenda_items);
        merged.votes = first_list(&by_freshness, |r| &r.votes);
        merged.observed_at = observations.iter().filter_map(|r| r.observed_at).max();
        Some(merged)
    }

    fn ordered<'a>(
        &self,
        records: &'a [CanonicalMeetingRecord],
        group: FieldGroup,
        source: impl Fn(&CanonicalMeetingRecord) -> Option<SourceKind>,
    ) -> Vec<&'a CanonicalMeetingRecord> {
        let rank = |record: &CanonicalMeetingRecord| match source(record) {
            Some(kind) => self.authority.rank(group, kind),
            None => usize::MAX,
        };
        let mut keyed: Vec<_> = records
            .iter()
            .map(|record| (rank(record), fingerprint(record), record))
            .collect();
        keyed.sort_by(|(rank_a, print_a, a), (rank_b, print_b, b)| {
            rank_a
                .cmp(rank_b)
                .then_with(|| freshness(self.tie_break, a.observed_at, b.observed_at))
                .then_with(|| print_a.cmp(print_b))
        });
        keyed.into_iter().map(|(_, _, record)| record).collect()
    }
}

/// Ascending start, then title, then uid.
pub fn collection_order(a: &CanonicalMeetingRecord, b: &CanonicalMeetingRecord) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.uid.cmp(&b.uid))
}

fn fingerprint(record: &CanonicalMeetingRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

fn first_nonempty(
    ordered: &[&CanonicalMeetingRecord],
    get: impl Fn(&CanonicalMeetingRecord) -> &String,
) -> String {
    ordered
        .iter()
        .map(|record| get(*record))
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn first_list<T: Clone>(
    ordered: &[&CanonicalMeetingRecord],
    get: impl Fn(&CanonicalMeetingRecord) -> &Vec<T>,
) -> Vec<T> {
    ordered
        .iter()
        .map(|record| get(*record))
        .find(|list| !list.is_empty())
        .cloned()
        .unwrap_or_default()
}
