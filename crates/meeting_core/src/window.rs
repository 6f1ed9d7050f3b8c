//! Crawl windows and the newsletter's date sections.

use crate::config::{CrawlWindowConfig, MAX_CRAWL_MONTHS};
use crate::schema::CanonicalMeetingRecord;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The calendar months a crawl requested, and the local dates they cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlWindow {
    pub months: Vec<(i32, u32)>,
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl CrawlWindow {
    /// `today`'s month plus `months_behind` before it and `months_ahead`
    /// after it, each capped at [`MAX_CRAWL_MONTHS`].
    pub fn around(today: NaiveDate, months_behind: u32, months_ahead: u32) -> Self {
        let current = month_index(today.year(), today.month());
        let from = current - months_behind.min(MAX_CRAWL_MONTHS) as i32;
        let to = current + months_ahead.min(MAX_CRAWL_MONTHS) as i32;
        let months: Vec<_> = (from..=to).map(month_from_index).collect();
        Self {
            first: first_day(from),
            last: first_day(to + 1) - Duration::days(1),
            months,
        }
    }

    pub fn from_config(today: NaiveDate, config: &CrawlWindowConfig) -> Self {
        Self::around(today, config.months_behind, config.months_ahead)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first <= date && date <= self.last
    }

    /// Both windows' months; the span covers everything in between.
    pub fn union(&self, other: &CrawlWindow) -> CrawlWindow {
        let mut months = self.months.clone();
        months.extend(other.months.iter().copied());
        months.sort_unstable();
        months.dedup();
        CrawlWindow {
            months,
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }
}

fn month_index(year: i32, month: u32) -> i32 {
    year * 12 + month as i32 - 1
}

fn month_from_index(index: i32) -> (i32, u32) {
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn first_day(index: i32) -> NaiveDate {
    let (year, month) = month_from_index(index);
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsletterSections {
    pub past_week: Vec<CanonicalMeetingRecord>,
    pub upcoming: Vec<CanonicalMeetingRecord>,
}

/// Past week is `[now - 7d, now)`, upcoming is `[now, now + 14d]`.
pub fn newsletter_sections(
    records: &[CanonicalMeetingRecord],
    now: DateTime<Utc>,
) -> NewsletterSections {
    let week_ago = now - Duration::days(7);
    let horizon = now + Duration::days(14);
    let mut sections = NewsletterSections::default();
    for record in records {
        let start = record.start.with_timezone(&Utc);
        if week_ago <= start && start < now {
            sections.past_week.push(record.clone());
        } else if now <= start && start <= horizon {
            sections.upcoming.push(record.clone());
        }
    }
    sections.past_week.sort_by(crate::dedup::collection_order);
    sections.upcoming.sort_by(crate::dedup::collection_order);
    sections
}
