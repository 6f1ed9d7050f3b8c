//! The fetch layer's hand-off: a JSON manifest naming every payload it
//! retrieved, inline or as files next to the manifest.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use meeting_core::document::DocumentContent;
use meeting_core::{DocumentKind, MeetingPayloads, RawDocument, RunInput, SourcePayload};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub listing_pages: Vec<PayloadEntry>,
    #[serde(default)]
    pub meetings: Vec<MeetingEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PayloadEntry {
    pub path: Option<PathBuf>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MeetingEntry {
    pub meeting_id: Option<String>,
    pub detail_url: Option<String>,
    pub calendar: Option<PayloadEntry>,
    pub detail: Option<PayloadEntry>,
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentEntry {
    pub kind: DocumentKind,
    pub path: PathBuf,
    pub url: Option<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing manifest {}", path.display()))
    }

    /// Reads every referenced file; relative paths resolve against `dir`.
    pub fn into_input(self, dir: &Path) -> Result<RunInput> {
        let listing_pages = self
            .listing_pages
            .into_iter()
            .map(|entry| entry.into_payload(dir))
            .collect::<Result<Vec<_>>>()?;
        let meetings = self
            .meetings
            .into_iter()
            .map(|entry| entry.into_payloads(dir))
            .collect::<Result<Vec<_>>>()?;
        Ok(RunInput {
            listing_pages,
            meetings,
            prior: Vec::new(),
        })
    }
}

impl PayloadEntry {
    fn into_payload(self, dir: &Path) -> Result<SourcePayload> {
        let body = match (self.body, self.path) {
            (Some(body), _) => body,
            (None, Some(path)) => {
                let path = dir.join(path);
                read_text(&path).with_context(|| format!("reading payload {}", path.display()))?
            }
            (None, None) => return Err(anyhow!("payload entry needs `body` or `path`")),
        };
        Ok(SourcePayload {
            body,
            url: self.url,
            fetched_at: self.fetched_at,
        })
    }
}

impl MeetingEntry {
    fn into_payloads(self, dir: &Path) -> Result<MeetingPayloads> {
        let documents = self
            .documents
            .into_iter()
            .map(|entry| entry.into_document(dir))
            .collect::<Result<Vec<_>>>()?;
        Ok(MeetingPayloads {
            meeting_id: self.meeting_id,
            detail_url: self.detail_url,
            calendar: self.calendar.map(|entry| entry.into_payload(dir)).transpose()?,
            detail: self.detail.map(|entry| entry.into_payload(dir)).transpose()?,
            documents,
        })
    }
}

impl DocumentEntry {
    fn into_document(self, dir: &Path) -> Result<RawDocument> {
        let path = dir.join(&self.path);
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        let content = if is_pdf {
            DocumentContent::Pdf(
                fs::read(&path).with_context(|| format!("reading document {}", path.display()))?,
            )
        } else {
            DocumentContent::Text(
                read_text(&path).with_context(|| format!("reading document {}", path.display()))?,
            )
        };
        Ok(RawDocument {
            kind: self.kind,
            content,
            url: self.url,
        })
    }
}

/// Invalid UTF-8 is replaced, leaving the parsers to reject the payload.
fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            warn!(path = %path.display(), "payload is not valid UTF-8");
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}
