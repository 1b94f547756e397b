//! Query result types exposed to the serving layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inclusive date-range filter. An absent bound means unbounded on that
/// side; the default range matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Everything matches.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Exactly one day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        if let Some(from) = self.from {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if date > to {
                return false;
            }
        }
        true
    }

    /// True when `[first, last]` overlaps this range at all: a session
    /// partially inside the range is included.
    pub fn overlaps(&self, first: NaiveDate, last: NaiveDate) -> bool {
        if let Some(from) = self.from {
            if last < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if first > to {
                return false;
            }
        }
        true
    }
}

/// Top-line totals across the filtered range.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Overview {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_read_cost: f64,
    pub cache_creation_cost: f64,
    pub messages: u64,
    /// Exact unique-session count over the filtered records.
    pub sessions: u64,
    pub days_active: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub lines_written: u64,
}

/// One calendar day's sums.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_cost: f64,
    pub messages: u64,
    /// Distinct sessions active that day (a session may span a day
    /// boundary and count toward both days).
    pub sessions: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub lines_written: u64,
}

impl DailySummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }
}

/// One session's aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub project: String,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    /// `last_ts - first_ts`; zero when timestamps are unknown.
    pub duration_secs: i64,
    pub messages: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_cost: f64,
    /// Models used, sorted for stable output.
    pub models: Vec<String>,
    /// Per-tool call counts.
    pub tools: HashMap<String, u64>,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub lines_written: u64,
}

impl SessionSummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }
}

/// Per-project sums, ranked by token volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSummary {
    pub project: String,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub messages: u64,
    pub sessions: u64,
}

/// Per-model sums, ranked by cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_cost: f64,
    pub messages: u64,
}

impl ModelSummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }
}

/// Per-tool call counts, ranked by calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSummary {
    pub tool: String,
    pub calls: u64,
    /// Share of all filtered tool calls; 0.0 when the total is zero.
    pub percentage: f64,
}

/// Hour-of-day sums (local time). Queries always return 24 entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HourlySummary {
    pub hour: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub messages: u64,
}
