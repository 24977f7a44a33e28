//! Entry ordering and admission rules

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::types::Entry;

/// How fetched entries are put into posting order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStrategy {
    /// Reverse the feed's order (feeds list newest first)
    Reverse,
    /// Sort by parsed publication time, oldest first
    ///
    /// Ties keep their feed order.
    #[default]
    SortByPublished,
}

impl FromStr for OrderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reverse" => Ok(OrderStrategy::Reverse),
            "sorted" | "sort" => Ok(OrderStrategy::SortByPublished),
            _ => Err(format!(
                "Invalid order: '{}'. Valid options: reverse, sorted",
                s
            )),
        }
    }
}

/// An entry paired with its parsed publication time
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: Entry,
    pub published_at: DateTime<FixedOffset>,
}

/// Outcome of ordering: candidates plus the entries whose date would not parse
pub struct Ordered {
    pub candidates: Vec<Candidate>,
    pub unparsable: Vec<Entry>,
}

/// Put entries into posting order, oldest first
pub fn order_entries(entries: Vec<Entry>, strategy: OrderStrategy, date_format: &str) -> Ordered {
    let mut candidates = Vec::with_capacity(entries.len());
    let mut unparsable = Vec::new();

    for entry in entries {
        match entry.published_at(date_format) {
            Some(published_at) => candidates.push(Candidate {
                entry,
                published_at,
            }),
            None => {
                tracing::warn!(
                    "Skipping {}: cannot parse published date {:?} with format {:?}",
                    entry.link,
                    entry.published,
                    date_format
                );
                unparsable.push(entry);
            }
        }
    }

    match strategy {
        OrderStrategy::Reverse => candidates.reverse(),
        OrderStrategy::SortByPublished => candidates.sort_by_key(|c| c.published_at),
    }

    Ordered {
        candidates,
        unparsable,
    }
}

/// Why an entry was or was not admitted for posting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Post,
    SkipTagged,
    AlreadyPosted,
    BeforeStart,
}

/// Admission rules for one run
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub skip_tag: Option<String>,
    pub start_boundary: Option<DateTime<FixedOffset>>,
    pub cursor: Option<DateTime<FixedOffset>>,
    /// The cursor as loaded when the run started
    pub loaded_cursor: Option<DateTime<FixedOffset>>,
}

impl EntryFilter {
    pub fn new(
        skip_tag: Option<String>,
        start_boundary: Option<DateTime<FixedOffset>>,
        cursor: Option<DateTime<FixedOffset>>,
    ) -> Self {
        Self {
            skip_tag,
            start_boundary,
            cursor,
            loaded_cursor: cursor,
        }
    }

    /// Apply skip-tag, cursor and start-date rules, in that order
    pub fn decide(&self, entry: &Entry, published_at: DateTime<FixedOffset>) -> Decision {
        if let Some(tag) = self.skip_tag.as_deref() {
            if entry.description.contains(tag) || entry.tags.iter().any(|t| t == tag) {
                return Decision::SkipTagged;
            }
        }

        if matches!(self.cursor, Some(cursor) if published_at <= cursor) {
            return Decision::AlreadyPosted;
        }

        if matches!(self.start_boundary, Some(start) if published_at <= start) {
            return Decision::BeforeStart;
        }

        Decision::Post
    }

    /// Whether an `AlreadyPosted` entry is newer than the cursor the run
    /// started from
    ///
    /// Such an entry was overtaken by a later one posted earlier in the same
    /// run, which only happens when the posting order does not match the
    /// publication dates. It will never be posted.
    pub fn overtaken(&self, published_at: DateTime<FixedOffset>) -> bool {
        self.loaded_cursor
            .map_or(true, |loaded| published_at > loaded)
    }

    /// Move the cursor after a successful save
    pub fn advance(&mut self, published_at: DateTime<FixedOffset>) {
        if self.cursor.map_or(true, |current| published_at > current) {
            self.cursor = Some(published_at);
        }
    }
}
