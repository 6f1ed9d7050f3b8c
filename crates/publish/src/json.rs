use anyhow::{Context, Result};
use meeting_core::CanonicalMeetingRecord;
use std::fs;
use std::path::Path;

/// Pretty-printed array, in collection order.
pub fn to_json(records: &[CanonicalMeetingRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

pub fn write_json(records: &[CanonicalMeetingRecord], path: &Path) -> Result<()> {
    let mut text = to_json(records)?;
    text.push('\n');
    crate::write_file(path, &text)
}

pub fn read_json(path: &Path) -> Result<Vec<CanonicalMeetingRecord>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
