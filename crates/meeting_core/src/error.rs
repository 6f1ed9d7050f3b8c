use crate::schema::{NaturalKey, SourceKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One source's payload did not have the expected overall shape.
/// The source contributes no fields; the meeting carries on without it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, JsonSchema)]
#[error("{kind} source unparsable: {reason}")]
pub struct UnparsableSourceError {
    pub kind: SourceKind,
    pub reason: String,
}

impl UnparsableSourceError {
    pub fn new(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("no usable start time: {0}")]
    InvalidTime(String),
    #[error("unknown time zone: {0}")]
    UnknownZone(String),
    #[error("default duration of {0} minutes is out of range")]
    DurationOutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("no source produced a partial record")]
    NoSources,
    #[error(transparent)]
    Time(#[from] TimeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("no usable input: {sources} sources offered, none parsable")]
    NoUsableInput { sources: usize },
    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Non-fatal: a document section could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentExtractionWarning {
    pub meeting: Option<String>,
    pub message: String,
    pub excerpt: Option<String>,
}

impl DocumentExtractionWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            meeting: None,
            message: message.into(),
            excerpt: None,
        }
    }

    pub fn with_excerpt(mut self, text: &str) -> Self {
        self.excerpt = Some(text.chars().take(120).collect());
        self
    }
}

impl fmt::Display for DocumentExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(meeting) = &self.meeting {
            write!(f, "[{meeting}] ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(excerpt) = &self.excerpt {
            write!(f, " ({excerpt})")?;
        }
        Ok(())
    }
}

/// A meeting excluded from the output collection, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DroppedMeeting {
    pub key: NaturalKey,
    pub reason: String,
}
