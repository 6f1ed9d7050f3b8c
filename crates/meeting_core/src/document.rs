//! Agenda and minutes extraction.
//!
//! Runs after reconciliation and only appends `agenda_items` / `votes` to
//! canonical records; it never touches time, location or link fields.

use crate::error::DocumentExtractionWarning;
use crate::schema::{AgendaItem, CanonicalMeetingRecord, VoteOutcome, VoteRecord};
use crate::sources::clean;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

const MIN_ITEM_TITLE_CHARS: usize = 10;
const MAX_ITEM_TITLE_CHARS: usize = 500;
const MAX_VOTERS: usize = 20;
const MAX_RAW_VOTE_CHARS: usize = 1000;

static ITEM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.[a-z0-9]+)*|[IVXLC]+|[A-Z])[.)]\s+(\S.*)$").unwrap()
});

static RECOMMENDATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:staff\s+)?recommend(?:ation|ed\s+action)s?\s*[:\-–]\s*(.*)$").unwrap()
});

static VOTE_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(motion|moved|roll\s+call|vote|yeas?|ayes?|nays?)\b").unwrap()
});

static ROLL_CALL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(yeas?|ayes?|nays?|noes|absent|abstain(?:ed|ing|s)?|excused)\b\s*[:\-–]?\s*")
        .unwrap()
});

static SECTION_STOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(?:\.\s*$|\n\s*(?:motion|the|resolution|item|carried|adopted|passed|failed)\b)",
    )
    .unwrap()
});

static MEMBER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:council\s*members?|commissioners?|trustees?|members?)\s+").unwrap()
});

static NAME_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i),|;|\band\b").unwrap());

static MOTION_TALLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:carried|passed|failed|vote|voted|approved|adopted|defeated|denied|motion)\b[^0-9\n]{0,20}(\d{1,2})\s*[-–]\s*(\d{1,2})\b",
    )
    .unwrap()
});

static TABLED_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(tabled?|postpone[ds]?|laid\s+on\s+the\s+table|held\s+over)\b").unwrap()
});
static PASSED_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(carried|passed|adopted|approved|prevailed)\b").unwrap());
static FAILED_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(failed|defeated|denied|lost)\b").unwrap());

static ITEM_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bitem\s+(?:no\.?\s*)?(\d+(?:\.[a-z0-9]+)?|[A-Z])\b").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Agenda,
    Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Pdf(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub kind: DocumentKind,
    pub content: DocumentContent,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentExtraction {
    pub agenda_items: Vec<AgendaItem>,
    pub votes: Vec<VoteRecord>,
    pub warnings: Vec<DocumentExtractionWarning>,
}

impl DocumentExtraction {
    /// Appends another document's output, renumbering ordinals.
    pub fn absorb(&mut self, other: DocumentExtraction) {
        let offset = self.agenda_items.len();
        self.agenda_items
            .extend(other.agenda_items.into_iter().map(|mut item| {
                item.ordinal += offset;
                item
            }));
        let offset = self.votes.len();
        self.votes.extend(other.votes.into_iter().map(|mut vote| {
            vote.ordinal += offset;
            vote
        }));
        self.warnings.extend(other.warnings);
    }
}

/// Agenda documents yield items, minutes yield votes.
pub fn extract_document(document: &RawDocument) -> DocumentExtraction {
    let text = match &document.content {
        DocumentContent::Text(text) => text.clone(),
        DocumentContent::Pdf(bytes) => match pdf_text(bytes) {
            Ok(text) => text,
            Err(mut warning) => {
                warning.excerpt = document.url.clone();
                return DocumentExtraction {
                    warnings: vec![warning],
                    ..DocumentExtraction::default()
                };
            }
        },
    };
    extract_from_text(document.kind, &text)
}

pub fn extract_from_text(kind: DocumentKind, text: &str) -> DocumentExtraction {
    match kind {
        DocumentKind::Agenda => {
            let (agenda_items, warnings) = parse_agenda_items(text);
            DocumentExtraction {
                agenda_items,
                votes: Vec::new(),
                warnings,
            }
        }
        DocumentKind::Minutes => {
            let (votes, warnings) = parse_votes(text);
            DocumentExtraction {
                agenda_items: Vec::new(),
                votes,
                warnings,
            }
        }
    }
}

#[cfg(feature = "pdf")]
pub fn pdf_text(bytes: &[u8]) -> Result<String, DocumentExtractionWarning> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| DocumentExtractionWarning::new(format!("PDF text extraction failed: {err}")))
}

#[cfg(not(feature = "pdf"))]
pub fn pdf_text(_bytes: &[u8]) -> Result<String, DocumentExtractionWarning> {
    Err(DocumentExtractionWarning::new(
        "PDF support not compiled in; rebuild with --features pdf",
    ))
}

struct ItemDraft {
    number: String,
    lines: Vec<String>,
    recommendation: Option<Vec<String>>,
}

impl ItemDraft {
    fn finish(self, ordinal: usize) -> Result<AgendaItem, DocumentExtractionWarning> {
        let title = clean(&self.lines.join(" ")).unwrap_or_default();
        if title.chars().count() <= MIN_ITEM_TITLE_CHARS {
            return Err(DocumentExtractionWarning::new(format!(
                "skipped agenda item {} with too little text",
                self.number
            ))
            .with_excerpt(&title));
        }
        Ok(AgendaItem {
            ordinal,
            number: self.number,
            title: title.chars().take(MAX_ITEM_TITLE_CHARS).collect(),
            recommendation: self
                .recommendation
                .and_then(|lines| clean(&lines.join(" "))),
        })
    }
}

/// Numbered agenda items (`1.`, `4.a.`, `12)`, `B.`, `IV.`). Text before the
/// first item and lines after a blank line are not part of any item.
pub fn parse_agenda_items(text: &str) -> (Vec<AgendaItem>, Vec<DocumentExtractionWarning>) {
    let mut items = Vec::new();
    let mut warnings = Vec::new();
    let mut current: Option<ItemDraft> = None;
    let mut open = false; // continuation lines still belong to `current`

    let mut flush = |draft: ItemDraft, items: &mut Vec<AgendaItem>| match draft.finish(items.len() + 1) {
        Ok(item) => items.push(item),
        Err(warning) => warnings.push(warning),
    };

    for line in text.lines() {
        if let Some(caps) = ITEM_LINE.captures(line) {
            if let Some(draft) = current.take() {
                flush(draft, &mut items);
            }
            current = Some(ItemDraft {
                number: caps[1].to_string(),
                lines: vec![caps[2].to_string()],
                recommendation: None,
            });
            open = true;
            continue;
        }
        if line.trim().is_empty() {
            open = false;
            continue;
        }
        let Some(draft) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = RECOMMENDATION_LINE.captures(line) {
            draft.recommendation = Some(vec![caps[1].to_string()]);
            open = true;
            continue;
        }
        if !open {
            continue;
        }
        match draft.recommendation.as_mut() {
            Some(recommendation) => recommendation.push(line.to_string()),
            None => draft.lines.push(line.to_string()),
        }
    }
    if let Some(draft) = current.take() {
        flush(draft, &mut items);
    }
    (items, warnings)
}

#[derive(Debug, Default)]
struct RollCall {
    yeas: Vec<String>,
    nays: Vec<String>,
    yea_count: Option<usize>,
    nay_count: Option<usize>,
}

/// Vote blocks in minutes text, one per paragraph that reads like a motion
/// or roll call. Unclassifiable blocks are kept with outcome `unknown`.
pub fn parse_votes(text: &str) -> (Vec<VoteRecord>, Vec<DocumentExtractionWarning>) {
    let mut votes = Vec::new();
    let mut warnings = Vec::new();
    let mut current_item: Option<String> = None;

    for paragraph in paragraphs(text) {
        let mut body_lines = Vec::new();
        let mut headings_only = true;
        for line in &paragraph {
            match ITEM_LINE.captures(line) {
                Some(caps) => {
                    current_item = Some(caps[1].to_string());
                    body_lines.push(caps.get(2).map_or("", |text| text.as_str()));
                }
                None => {
                    headings_only = false;
                    body_lines.push(*line);
                }
            }
        }
        let block = body_lines.join("\n");
        if !VOTE_TRIGGER.is_match(&block) {
            continue;
        }

        let roll_call = roll_call(&block);
        let (outcome, tally) = classify(&block, &roll_call);
        // A bare "3. Roll Call" heading is not a vote.
        if headings_only && outcome == VoteOutcome::Unknown {
            continue;
        }
        let raw_text: String = clean(&block)
            .unwrap_or_default()
            .chars()
            .take(MAX_RAW_VOTE_CHARS)
            .collect();
        if outcome == VoteOutcome::Unknown {
            warnings.push(
                DocumentExtractionWarning::new("vote block could not be classified")
                    .with_excerpt(&raw_text),
            );
        }
        let item = ITEM_REFERENCE
            .captures(&block)
            .map(|caps| caps[1].to_string())
            .or_else(|| current_item.clone());

        votes.push(VoteRecord {
            ordinal: votes.len() + 1,
            item,
            outcome,
            tally,
            yeas: roll_call.yeas,
            nays: roll_call.nays,
            raw_text,
        });
    }
    (votes, warnings)
}

fn paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn roll_call(block: &str) -> RollCall {
    let markers: Vec<_> = ROLL_CALL_MARKER.captures_iter(block).collect();
    let mut result = RollCall::default();
    for (index, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let section_end = markers
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(block.len());
        let mut section = &block[whole.end()..section_end];
        if let Some(stop) = SECTION_STOP.find(section) {
            section = &section[..stop.start()];
        }

        let label = label.as_str().to_lowercase();
        let is_yea = label.starts_with("yea") || label.starts_with("aye");
        let is_nay = label.starts_with("nay") || label == "noes";
        if !is_yea && !is_nay {
            continue;
        }
        let (names, count) = section_members(section);
        if is_yea {
            result.yeas.extend(names);
            result.yea_count = Some(result.yea_count.unwrap_or(0) + count);
        } else {
            result.nays.extend(names);
            result.nay_count = Some(result.nay_count.unwrap_or(0) + count);
        }
    }
    result.yeas.truncate(MAX_VOTERS);
    result.nays.truncate(MAX_VOTERS);
    result
}

/// Names listed in a roll-call section, and how many voted that way.
fn section_members(section: &str) -> (Vec<String>, usize) {
    let trimmed = section.trim().trim_end_matches(['.', ',', ';']);
    let digits: String = trimmed.chars().take_while(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        return (Vec::new(), digits.parse().unwrap_or(0));
    }
    let trimmed = MEMBER_PREFIX.replace(trimmed, "");
    let names: Vec<String> = NAME_SPLIT
        .split(&trimmed)
        .filter_map(clean)
        .filter(|name| !name.eq_ignore_ascii_case("none"))
        .collect();
    let count = names.len();
    (names, count)
}

fn classify(block: &str, roll_call: &RollCall) -> (VoteOutcome, Option<String>) {
    let counted = match (roll_call.yea_count, roll_call.nay_count) {
        (None, None) => MOTION_TALLY.captures(block).and_then(|caps| {
            let yeas: usize = caps[1].parse().ok()?;
            let nays: usize = caps[2].parse().ok()?;
            Some((yeas, nays))
        }),
        (yeas, nays) => Some((yeas.unwrap_or(0), nays.unwrap_or(0))),
    };
    let tally = counted.map(|(yeas, nays)| format!("{yeas}-{nays}"));

    let outcome = if TABLED_WORDS.is_match(block) {
        VoteOutcome::Tabled
    } else if let Some((yeas, nays)) = counted {
        if yeas > nays {
            VoteOutcome::Passed
        } else {
            VoteOutcome::Failed
        }
    } else if FAILED_WORDS.is_match(block) {
        VoteOutcome::Failed
    } else if PASSED_WORDS.is_match(block) {
        VoteOutcome::Passed
    } else {
        VoteOutcome::Unknown
    };
    (outcome, tally)
}

/// Appends an extraction to one record. Existing lists are replaced only by
/// non-empty output.
pub fn attach(
    record: &mut CanonicalMeetingRecord,
    extraction: DocumentExtraction,
) -> Vec<DocumentExtractionWarning> {
    if !extraction.agenda_items.is_empty() {
        record.agenda_items = extraction.agenda_items;
    }
    if !extraction.votes.is_empty() {
        record.votes = extraction.votes;
    }
    extraction
        .warnings
        .into_iter()
        .map(|mut warning| {
            warning.meeting = Some(record.uid.clone());
            warning
        })
        .collect()
}

/// Attaches extractions keyed by uid or portal meeting id.
pub fn enrich(
    records: &mut [CanonicalMeetingRecord],
    extractions: BTreeMap<String, DocumentExtraction>,
) -> Vec<DocumentExtractionWarning> {
    let mut warnings = Vec::new();
    for (key, extraction) in extractions {
        let target = records
            .iter_mut()
            .find(|record| record.uid == key || record.meeting_id.as_deref() == Some(key.as_str()));
        match target {
            Some(record) => warnings.extend(attach(record, extraction)),
            None => warnings.push(DocumentExtractionWarning {
                meeting: Some(key),
                message: "no meeting matches this document key".to_string(),
                excerpt: None,
            }),
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const AGENDA: &str = "\
CITY COUNCIL FORMAL SESSION
Tuesday, November 5, 2025

1. Call to Order
2. Roll Call
3. Approval of the Journal of the Previous Session
4. Resolution approving the Gratiot corridor
   streetscape construction contract
   Recommendation: Approve the contract with Major Cement Co.
   in the amount of $4,210,000
5. Ordinance amending Chapter 22 regarding sidewalk vending
IV. Adjournment and closing remarks by the President
";

    const MINUTES: &str = "\
4. Resolution approving the Gratiot corridor streetscape contract

Motion by Council Member Santiago-Romero, supported by Council Member Whitfield Calloway, to approve.
YEAS: Council Members Benson, Durhal, Johnson, Santiago-Romero, and Whitfield Calloway
NAYS: Tate
Motion carried.

5. Ordinance amending Chapter 22 regarding sidewalk vending

Motion to postpone consideration until the next formal session. Motion carried 6-1.

Item 7 was taken up out of order. Motion to deny the appeal. Ayes 2, Nays 5.

6. Appointment to the Board of Review

The vote on this appointment was taken by roll call.
";

    #[test]
    fn agenda_items_with_continuations_and_recommendation() {
        let (items, warnings) = parse_agenda_items(AGENDA);
        let numbers: Vec<_> = items.iter().map(|item| item.number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "3", "4", "5", "IV"]);
        assert_eq!(
            items[2].title,
            "Resolution approving the Gratiot corridor streetscape construction contract"
        );
        assert_eq!(
            items[2].recommendation.as_deref(),
            Some("Approve the contract with Major Cement Co. in the amount of $4,210,000")
        );
        assert_eq!(items[0].ordinal, 1);
        assert_eq!(items[4].ordinal, 5);
        // "Roll Call" is too short to be an item.
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("agenda item 2"));
    }

    #[test]
    fn unnumbered_text_yields_nothing() {
        let (items, warnings) = parse_agenda_items("Welcome to the meeting.\nPlease silence phones.");
        assert!(items.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn votes_are_classified() {
        let (votes, warnings) = parse_votes(MINUTES);
        assert_eq!(votes.len(), 4);

        assert_eq!(votes[0].item.as_deref(), Some("4"));
        assert_eq!(votes[0].outcome, VoteOutcome::Passed);
        assert_eq!(votes[0].tally.as_deref(), Some("5-1"));
        assert_eq!(
            votes[0].yeas,
            vec!["Benson", "Durhal", "Johnson", "Santiago-Romero", "Whitfield Calloway"]
        );
        assert_eq!(votes[0].nays, vec!["Tate"]);

        assert_eq!(votes[1].item.as_deref(), Some("5"));
        assert_eq!(votes[1].outcome, VoteOutcome::Tabled);
        assert_eq!(votes[1].tally.as_deref(), Some("6-1"));

        assert_eq!(votes[2].item.as_deref(), Some("7"));
        assert_eq!(votes[2].outcome, VoteOutcome::Failed);
        assert_eq!(votes[2].tally.as_deref(), Some("2-5"));

        assert_eq!(votes[3].item.as_deref(), Some("6"));
        assert_eq!(votes[3].outcome, VoteOutcome::Unknown);
        assert!(votes[3].raw_text.contains("roll call"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn numbered_line_carrying_its_own_motion() {
        let extraction = extract_from_text(
            DocumentKind::Minutes,
            "3. Roll Call\n\n5. Approval of the Journal. Motion carried 7-0.\n",
        );
        assert_eq!(extraction.votes.len(), 1);
        let vote = &extraction.votes[0];
        assert_eq!(vote.item.as_deref(), Some("5"));
        assert_eq!(vote.outcome, VoteOutcome::Passed);
        assert_eq!(vote.tally.as_deref(), Some("7-0"));
        assert!(vote.raw_text.contains("Approval of the Journal"));
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn enrich_matches_uid_or_meeting_id() {
        let mut record = crate::reconcile::tests::sample_record();
        record.meeting_id = Some("1742".to_string());
        let mut records = vec![record];

        let mut extractions = BTreeMap::new();
        extractions.insert("1742".to_string(), extract_from_text(DocumentKind::Minutes, MINUTES));
        extractions.insert("nope".to_string(), DocumentExtraction::default());
        let warnings = enrich(&mut records, extractions);

        assert_eq!(records[0].votes.len(), 4);
        assert!(records[0].agenda_items.is_empty());
        let unmatched: Vec<_> = warnings
            .iter()
            .filter(|warning| warning.meeting.as_deref() == Some("nope"))
            .collect();
        assert_eq!(unmatched.len(), 1);
        assert!(
            warnings
                .iter()
                .any(|warning| warning.meeting.as_deref() == Some(records[0].uid.as_str()))
        );
    }

    #[test]
    fn absorb_renumbers() {
        let mut first = extract_from_text(DocumentKind::Agenda, AGENDA);
        let second = extract_from_text(DocumentKind::Agenda, "1. Supplemental budget amendment for parks");
        first.absorb(second);
        assert_eq!(first.agenda_items.len(), 6);
        assert_eq!(first.agenda_items[5].ordinal, 6);
    }
}
