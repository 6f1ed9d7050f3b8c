//! Downstream projections of a canonical meeting collection: JSON and ICS
//! files, and a SQLite store of previously emitted records.

pub mod ics;
pub mod json;
pub mod store;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use meeting_core::CanonicalMeetingRecord;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct OutputPaths {
    pub root: PathBuf,
    pub json_path: PathBuf,
    pub ics_path: PathBuf,
}

impl OutputPaths {
    /// `<root>/<basename>.json` and `<root>/<basename>.ics`.
    pub fn new(root: impl Into<PathBuf>, basename: &str) -> Self {
        let root = root.into();
        Self {
            json_path: root.join(format!("{basename}.json")),
            ics_path: root.join(format!("{basename}.ics")),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating output directory {}", self.root.display()))?;
        Ok(())
    }
}

/// Writes both projections of `records`.
pub fn publish_all(
    records: &[CanonicalMeetingRecord],
    paths: &OutputPaths,
    dtstamp: DateTime<Utc>,
) -> Result<()> {
    paths.ensure()?;
    json::write_json(records, &paths.json_path)?;
    ics::write_ics(records, &paths.ics_path, dtstamp)?;
    info!(
        meetings = records.len(),
        json = %paths.json_path.display(),
        ics = %paths.ics_path.display(),
        "published"
    );
    Ok(())
}

pub(crate) fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_share_a_basename() {
        let paths = OutputPaths::new("out", "meetings");
        assert_eq!(paths.json_path, PathBuf::from("out/meetings.json"));
        assert_eq!(paths.ics_path, PathBuf::from("out/meetings.ics"));
    }
}
