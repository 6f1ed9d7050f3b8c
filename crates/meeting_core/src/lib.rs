//! Reconciliation engine for municipal meeting portals.
//!
//! Raw listing, calendar and detail payloads go in; an ordered, deduplicated
//! collection of [`CanonicalMeetingRecord`]s comes out. Nothing here performs
//! network or file I/O apart from [`ReconcileConfig::load`].

pub mod config;
pub mod dedup;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod schema;
pub mod sources;
pub mod time;
pub mod window;

pub use config::{AuthorityTable, FieldGroup, ReconcileConfig, TieBreak};
pub use dedup::CollectionBuilder;
pub use document::{DocumentExtraction, DocumentKind, RawDocument};
pub use error::{
    DocumentExtractionWarning, DroppedMeeting, ReconcileError, RunError, TimeError,
    UnparsableSourceError,
};
pub use pipeline::{MeetingPayloads, RunInput, RunReport, SourcePayload, run};
pub use reconcile::{Reconciler, compute_uid};
pub use schema::{
    AgendaItem, CanonicalMeetingRecord, NaturalKey, PartialMeetingRecord, Provenance, SourceKind,
    TimeValue, VoteOutcome, VoteRecord,
};
pub use window::{CrawlWindow, NewsletterSections, newsletter_sections};
