use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Listing, // list/AJAX view of one crawl window
    Ics,     // per-meeting calendar file
    Detail,  // per-meeting detail page
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SourceKind::Listing => "listing",
            SourceKind::Ics => "ics",
            SourceKind::Detail => "detail",
        };
        write!(f, "{value}")
    }
}

/// A time as one source expressed it, before zone resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TimeValue {
    /// Carries an explicit UTC offset; trusted verbatim.
    Instant(DateTime<FixedOffset>),
    /// Wall-clock time; `tzname` is the zone the source named, if any.
    Local {
        datetime: NaiveDateTime,
        tzname: Option<String>,
    },
    Date(NaiveDate),
    /// Unparsed text, resolved during normalization.
    Text(String),
}

/// Pre-hash grouping key: `id:<portal id>` or `tbd:<title>|<body>|<date>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct NaturalKey(pub String);

impl NaturalKey {
    pub fn from_meeting_id(id: &str) -> Self {
        Self(format!("id:{}", id.trim()))
    }

    pub fn from_parts(title: Option<&str>, body: Option<&str>, date: Option<NaiveDate>) -> Self {
        let date = date.map(|value| value.to_string()).unwrap_or_default();
        Self(format!(
            "tbd:{}|{}|{}",
            title.unwrap_or_default().trim().to_lowercase(),
            body.unwrap_or_default().trim().to_lowercase(),
            date
        ))
    }

    /// Portal id when present, otherwise (title, body, start date).
    pub fn derive(partial: &PartialMeetingRecord) -> Self {
        match partial.meeting_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Self::from_meeting_id(id),
            _ => Self::from_parts(
                partial.title.as_deref(),
                partial.body.as_deref(),
                partial.start.as_ref().and_then(TimeValue::calendar_date),
            ),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TimeValue {
    /// Date as written by the source, without zone conversion.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        match self {
            TimeValue::Instant(value) => Some(value.date_naive()),
            TimeValue::Local { datetime, .. } => Some(datetime.date()),
            TimeValue::Date(date) => Some(*date),
            TimeValue::Text(text) => crate::time::parse_time_text(text)
                .filter(|parsed| !matches!(parsed, TimeValue::Text(_)))
                .and_then(|parsed| parsed.calendar_date()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PublishedFile {
    pub kind: String, // "Agenda", "Minutes", "Agenda Packet", ...
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PartialMeetingRecord {
    pub source_kind: SourceKind,
    pub natural_key: NaturalKey,
    pub meeting_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub start: Option<TimeValue>,
    pub end: Option<TimeValue>,
    pub all_day: Option<bool>,
    pub location: Option<String>,
    pub address: Option<String>,
    pub virtual_link: Option<String>,
    pub agenda_url: Option<String>,
    pub minutes_url: Option<String>,
    pub detail_url: Option<String>,
    pub calendar_url: Option<String>, // discovered ICS link, for the fetch layer
    #[serde(default)]
    pub published_files: Vec<PublishedFile>,
    #[serde(default)]
    pub agenda_items: Vec<AgendaItem>,
    #[serde(default)]
    pub votes: Vec<VoteRecord>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PartialMeetingRecord {
    pub fn new(source_kind: SourceKind) -> Self {
        Self {
            source_kind,
            natural_key: NaturalKey(String::new()),
            meeting_id: None,
            title: None,
            body: None,
            start: None,
            end: None,
            all_day: None,
            location: None,
            address: None,
            virtual_link: None,
            agenda_url: None,
            minutes_url: None,
            detail_url: None,
            calendar_url: None,
            published_files: Vec::new(),
            agenda_items: Vec::new(),
            votes: Vec::new(),
            fetched_at: None,
        }
    }

    /// Recomputes `natural_key` from the fields currently set.
    pub fn keyed(mut self) -> Self {
        self.natural_key = NaturalKey::derive(&self);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Passed,
    Failed,
    Tabled,
    Unknown,
}

impl fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            VoteOutcome::Passed => "passed",
            VoteOutcome::Failed => "failed",
            VoteOutcome::Tabled => "tabled",
            VoteOutcome::Unknown => "unknown",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AgendaItem {
    pub ordinal: usize,
    pub number: String, // label as printed: "4", "B", "IV"
    pub title: String,
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoteRecord {
    pub ordinal: usize,
    pub item: Option<String>, // agenda item number the vote belongs to
    pub outcome: VoteOutcome,
    pub tally: Option<String>,
    #[serde(default)]
    pub yeas: Vec<String>,
    #[serde(default)]
    pub nays: Vec<String>,
    pub raw_text: String,
}

/// Which source supplied each field group of a canonical record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    pub time: Option<SourceKind>,
    pub end_estimated: bool,
    pub links: Option<SourceKind>,
    pub naming: Option<SourceKind>,
    pub location: Option<SourceKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalMeetingRecord {
    pub uid: String,
    pub title: String,
    pub body: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub all_day: bool,
    pub timezone: String,
    pub location: String,
    pub address: String,
    pub virtual_link: String,
    pub agenda_url: String,
    pub minutes_url: String,
    pub detail_url: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub published_files: Vec<PublishedFile>,
    #[serde(default)]
    pub agenda_items: Vec<AgendaItem>,
    #[serde(default)]
    pub votes: Vec<VoteRecord>,
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl CanonicalMeetingRecord {
    /// "body: title" when a body is known.
    pub fn summary(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.body, self.title)
        }
    }
}
