//! The canonical ingested event: one assistant turn of a coding-agent session.

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Model id reserved for non-billable system turns.
pub const SYNTHETIC_MODEL: &str = "<synthetic>";

/// One usage event. `id` is the dedup key: for a given `id` at most one
/// logical Record exists in any rollup at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    /// May be absent for turns logged without a timestamp; such records
    /// never enter the day/hour rollups.
    pub timestamp: Option<DateTime<Utc>>,
    pub model: String,
    pub session_id: String,
    pub project: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Tool names invoked during this turn.
    #[serde(default)]
    pub tools: HashSet<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub lines_added: u64,
    #[serde(default)]
    pub lines_removed: u64,
    #[serde(default)]
    pub lines_written: u64,
}

impl Record {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }

    /// Convert UTC timestamp to local timezone date.
    /// Ensures date grouping matches the user's local calendar.
    pub fn local_date(&self) -> Option<NaiveDate> {
        self.timestamp
            .map(|ts| ts.with_timezone(&Local).date_naive())
    }

    /// Local hour-of-day (0-23).
    pub fn local_hour(&self) -> Option<u32> {
        self.timestamp.map(|ts| ts.with_timezone(&Local).hour())
    }

    /// Last-write-wins merge for a re-observed `id`: scalar fields from
    /// `newer` replace this record's, tool sets union. Providers stream the
    /// same logical turn multiple times with growing content, so tool calls
    /// accumulate across partial writes. A `None` timestamp on the newer
    /// observation keeps the earlier instant.
    pub fn merge_from(&mut self, newer: Record) {
        let timestamp = newer.timestamp.or(self.timestamp);
        let mut tools = std::mem::take(&mut self.tools);
        tools.extend(newer.tools.iter().cloned());
        *self = newer;
        self.timestamp = timestamp;
        self.tools = tools;
    }
}
