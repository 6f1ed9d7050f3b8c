use crate::error::TimeError;
use crate::schema::SourceKind;
use anyhow::{Context, Result, anyhow};
use chrono::Duration;
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_TIMEZONE: &str = "America/Detroit";
pub const DEFAULT_DURATION_MINUTES: i64 = 120;
/// One week.
pub const MAX_DURATION_MINUTES: i64 = 7 * 24 * 60;
/// Upper bound for either side of the crawl window.
pub const MAX_CRAWL_MONTHS: u32 = 24;
pub const DEFAULT_SOURCE_ID: &str = "escribe-detroit";
pub const DEFAULT_PORTAL_BASE: &str = "https://pub-detroitmi.escribemeetings.com/";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Time,
    Links,
    Naming,
    Location,
}

/// Per field group, the sources in descending authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AuthorityTable {
    pub time: Vec<SourceKind>,
    pub links: Vec<SourceKind>,
    pub naming: Vec<SourceKind>,
    pub location: Vec<SourceKind>,
}

impl Default for AuthorityTable {
    fn default() -> Self {
        use SourceKind::*;
        Self {
            time: vec![Ics, Detail, Listing],
            links: vec![Detail, Listing, Ics],
            naming: vec![Listing, Detail, Ics],
            location: vec![Detail, Ics, Listing],
        }
    }
}

impl AuthorityTable {
    pub fn order(&self, group: FieldGroup) -> &[SourceKind] {
        match group {
            FieldGroup::Time => &self.time,
            FieldGroup::Links => &self.links,
            FieldGroup::Naming => &self.naming,
            FieldGroup::Location => &self.location,
        }
    }

    /// Lower is more authoritative. Kinds missing from the table rank last.
    pub fn rank(&self, group: FieldGroup, kind: SourceKind) -> usize {
        let order = self.order(group);
        order
            .iter()
            .position(|candidate| *candidate == kind)
            .unwrap_or(order.len())
    }

    fn validate(&self) -> Result<()> {
        for group in [
            FieldGroup::Time,
            FieldGroup::Links,
            FieldGroup::Naming,
            FieldGroup::Location,
        ] {
            let order = self.order(group);
            for (index, kind) in order.iter().enumerate() {
                if order[..index].contains(kind) {
                    return Err(anyhow!("authority for {group:?} lists {kind} twice"));
                }
            }
        }
        Ok(())
    }
}

/// How equal-authority observations of the same field are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Freshest,
    FirstSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CrawlWindowConfig {
    pub months_behind: u32,
    pub months_ahead: u32,
}

impl Default for CrawlWindowConfig {
    fn default() -> Self {
        Self {
            months_behind: 1,
            months_ahead: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReconcileConfig {
    pub timezone: String,
    pub default_duration_minutes: i64,
    pub parse_documents: bool,
    pub source_id: String,
    pub portal_base: String,
    pub tie_break: TieBreak,
    pub crawl_window: CrawlWindowConfig,
    pub authority: AuthorityTable,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            default_duration_minutes: DEFAULT_DURATION_MINUTES,
            parse_documents: false,
            source_id: DEFAULT_SOURCE_ID.to_string(),
            portal_base: DEFAULT_PORTAL_BASE.to_string(),
            tie_break: TieBreak::default(),
            crawl_window: CrawlWindowConfig::default(),
            authority: AuthorityTable::default(),
        }
    }
}

impl ReconcileConfig {
    /// Reads TOML, or YAML when the extension is `.yaml`/`.yml`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let config = if is_yaml {
            Self::from_yaml_str(&raw)?
        } else {
            Self::from_toml_str(&raw)?
        };
        config
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.zone()?;
        self.fallback_duration()?;
        let window = self.crawl_window;
        if window.months_behind > MAX_CRAWL_MONTHS || window.months_ahead > MAX_CRAWL_MONTHS {
            return Err(anyhow!(
                "crawl_window months must be at most {MAX_CRAWL_MONTHS}, got {} behind and {} ahead",
                window.months_behind,
                window.months_ahead
            ));
        }
        if self.source_id.trim().is_empty() {
            return Err(anyhow!("source_id must not be empty"));
        }
        self.authority.validate()
    }

    pub fn zone(&self) -> Result<Tz, TimeError> {
        parse_zone(&self.timezone)
    }

    /// Between one minute and [`MAX_DURATION_MINUTES`].
    pub fn fallback_duration(&self) -> Result<Duration, TimeError> {
        let minutes = self.default_duration_minutes;
        if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
            return Err(TimeError::DurationOutOfRange(minutes));
        }
        Duration::try_minutes(minutes).ok_or(TimeError::DurationOutOfRange(minutes))
    }
}

pub fn parse_zone(name: &str) -> Result<Tz, TimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeError::UnknownZone(name.to_string()))
}
