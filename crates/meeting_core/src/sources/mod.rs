//! Source parsers. Each turns one raw payload into partial records and
//! fails only when the payload as a whole has the wrong shape.

pub mod detail;
pub mod ics;
pub mod links;
pub mod listing;

pub use detail::parse_detail_page;
pub use ics::{parse_ics_event, parse_ics_payload};
pub use listing::{ListingPage, parse_listing_entry, parse_listing_page};

use regex::Regex;
use std::sync::LazyLock;

static BODY_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(COMMITTEE|COMMISSION|COUNCIL)\b").unwrap());

/// Collapses whitespace; `None` when nothing remains.
pub fn clean(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Splits a lone portal name into (title, body). Names that read like a
/// public body become the body with the generic title "Meeting".
pub fn split_title_body(name: Option<&str>, body: Option<&str>) -> (Option<String>, Option<String>) {
    let name = name.and_then(clean);
    let body = body.and_then(clean);
    match (name, body) {
        (Some(name), None) if BODY_WORDS.is_match(&name) => (Some("Meeting".to_string()), Some(name)),
        (Some(name), Some(body)) if name.eq_ignore_ascii_case(&body) => {
            (Some("Meeting".to_string()), Some(body))
        }
        other => other,
    }
}
