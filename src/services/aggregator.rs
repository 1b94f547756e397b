//! In-memory usage rollups over a single append stream of Records.
//!
//! The aggregator keeps two representations on purpose: pre-aggregated
//! buckets (day, session, project, model, hour, tool counter) for cheap
//! O(buckets) queries, and the flat record log for exact date-filtered
//! recomputation of breakdowns the buckets don't preserve (per-type cost
//! split, exact session membership). Query docs note which path they take;
//! do not collapse the record log into the buckets.

use crate::services::pricing::PricingTable;
use crate::types::{
    DailySummary, DateRange, HourlySummary, ModelSummary, Overview, ProjectSummary, Record,
    SessionSummary, ToolSummary,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};

pub const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Default, Clone)]
struct DayBucket {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_creation_tokens: u64,
    cost: f64,
    messages: u64,
    lines_added: u64,
    lines_removed: u64,
    lines_written: u64,
    /// The same session may span a day boundary, so day buckets track the
    /// id set rather than a counter.
    session_ids: HashSet<String>,
}

#[derive(Debug, Clone)]
struct SessionBucket {
    project: String,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
    messages: u64,
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_creation_tokens: u64,
    cost: f64,
    models: HashSet<String>,
    tools: HashMap<String, u64>,
    lines_added: u64,
    lines_removed: u64,
    lines_written: u64,
}

impl SessionBucket {
    fn new(project: String) -> Self {
        Self {
            project,
            first_ts: None,
            last_ts: None,
            messages: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost: 0.0,
            models: HashSet::new(),
            tools: HashMap::new(),
            lines_added: 0,
            lines_removed: 0,
            lines_written: 0,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ProjectBucket {
    total_tokens: u64,
    cost: f64,
    messages: u64,
    session_ids: HashSet<String>,
}

#[derive(Debug, Default, Clone)]
struct ModelBucket {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_creation_tokens: u64,
    cost: f64,
    messages: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct HourBucket {
    total_tokens: u64,
    cost: f64,
    messages: u64,
}

/// Maintains all rollups from a single append stream.
///
/// `add_records` is not idempotent: adding the same Record twice
/// double-counts. Safe re-ingestion goes through the owning store's
/// upsert-by-id feeding a rebuilt aggregator (see `AggregatorCache`).
pub struct Aggregator {
    pricing: PricingTable,
    records: Vec<Record>,
    daily: HashMap<NaiveDate, DayBucket>,
    sessions: HashMap<String, SessionBucket>,
    projects: HashMap<String, ProjectBucket>,
    models: HashMap<String, ModelBucket>,
    hours: [HourBucket; HOURS_PER_DAY],
    tool_calls: HashMap<String, u64>,
}

impl Aggregator {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            records: Vec::new(),
            daily: HashMap::new(),
            sessions: HashMap::new(),
            projects: HashMap::new(),
            models: HashMap::new(),
            hours: [HourBucket::default(); HOURS_PER_DAY],
            tool_calls: HashMap::new(),
        }
    }

    /// Drop all state. A full rebuild is reset + re-ingest of full history.
    pub fn reset(&mut self) {
        let pricing = self.pricing.clone();
        *self = Self::new(pricing);
    }

    /// Append a batch. Per-file discovery order must be preserved by the
    /// caller; cross-file order doesn't matter (rollups are commutative
    /// apart from the by-id merge done upstream in the parser/store).
    pub fn add_records(&mut self, records: Vec<Record>) {
        for record in records {
            self.add_record(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The raw append log, for downstream consumers (streaks, extremes,
    /// day-of-week stats) that need record-level scans.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn add_record(&mut self, record: Record) {
        let cost = self.pricing.cost(&record);
        let total_tokens = record.total_tokens();

        // Day + hour rollups only exist for dated records.
        if let Some(date) = record.local_date() {
            let day = self.daily.entry(date).or_default();
            day.input_tokens = day.input_tokens.saturating_add(record.input_tokens);
            day.output_tokens = day.output_tokens.saturating_add(record.output_tokens);
            day.cache_read_tokens = day.cache_read_tokens.saturating_add(record.cache_read_tokens);
            day.cache_creation_tokens = day
                .cache_creation_tokens
                .saturating_add(record.cache_creation_tokens);
            day.cost += cost;
            day.messages += 1;
            day.lines_added = day.lines_added.saturating_add(record.lines_added);
            day.lines_removed = day.lines_removed.saturating_add(record.lines_removed);
            day.lines_written = day.lines_written.saturating_add(record.lines_written);
            day.session_ids.insert(record.session_id.clone());

            if let Some(hour) = record.local_hour() {
                let bucket = &mut self.hours[hour as usize];
                bucket.total_tokens = bucket.total_tokens.saturating_add(total_tokens);
                bucket.cost += cost;
                bucket.messages += 1;
            }
        }

        let session = self
            .sessions
            .entry(record.session_id.clone())
            .or_insert_with(|| SessionBucket::new(record.project.clone()));
        if let Some(ts) = record.timestamp {
            session.first_ts = Some(session.first_ts.map_or(ts, |first| first.min(ts)));
            session.last_ts = Some(session.last_ts.map_or(ts, |last| last.max(ts)));
        }
        session.messages += 1;
        session.input_tokens = session.input_tokens.saturating_add(record.input_tokens);
        session.output_tokens = session.output_tokens.saturating_add(record.output_tokens);
        session.cache_read_tokens = session
            .cache_read_tokens
            .saturating_add(record.cache_read_tokens);
        session.cache_creation_tokens = session
            .cache_creation_tokens
            .saturating_add(record.cache_creation_tokens);
        session.cost += cost;
        session.models.insert(record.model.clone());
        for tool in &record.tools {
            *session.tools.entry(tool.clone()).or_default() += 1;
        }
        session.lines_added = session.lines_added.saturating_add(record.lines_added);
        session.lines_removed = session.lines_removed.saturating_add(record.lines_removed);
        session.lines_written = session.lines_written.saturating_add(record.lines_written);

        let project = self.projects.entry(record.project.clone()).or_default();
        project.total_tokens = project.total_tokens.saturating_add(total_tokens);
        project.cost += cost;
        project.messages += 1;
        project.session_ids.insert(record.session_id.clone());

        let model = self.models.entry(record.model.clone()).or_default();
        model.input_tokens = model.input_tokens.saturating_add(record.input_tokens);
        model.output_tokens = model.output_tokens.saturating_add(record.output_tokens);
        model.cache_read_tokens = model
            .cache_read_tokens
            .saturating_add(record.cache_read_tokens);
        model.cache_creation_tokens = model
            .cache_creation_tokens
            .saturating_add(record.cache_creation_tokens);
        model.cost += cost;
        model.messages += 1;

        for tool in &record.tools {
            *self.tool_calls.entry(tool.clone()).or_default() += 1;
        }

        self.records.push(record);
    }

    /// A record participates in a date-filtered scan only when it carries a
    /// timestamp whose local date falls in range.
    fn record_in_range(record: &Record, range: DateRange) -> bool {
        record.local_date().is_some_and(|date| range.contains(date))
    }

    /// Top-line totals. Token/line/message sums come from the day buckets
    /// (O(days)); the four cost sub-totals and the exact unique-session
    /// count come from a record scan (O(records in range)), because the
    /// per-type split and exact session membership aren't preserved
    /// separately in the bucket sums.
    pub fn overview(&self, range: DateRange) -> Overview {
        let mut overview = Overview::default();

        for (date, day) in &self.daily {
            if !range.contains(*date) {
                continue;
            }
            overview.input_tokens = overview.input_tokens.saturating_add(day.input_tokens);
            overview.output_tokens = overview.output_tokens.saturating_add(day.output_tokens);
            overview.cache_read_tokens = overview
                .cache_read_tokens
                .saturating_add(day.cache_read_tokens);
            overview.cache_creation_tokens = overview
                .cache_creation_tokens
                .saturating_add(day.cache_creation_tokens);
            overview.total_cost += day.cost;
            overview.messages += day.messages;
            overview.days_active += 1;
            overview.lines_added = overview.lines_added.saturating_add(day.lines_added);
            overview.lines_removed = overview.lines_removed.saturating_add(day.lines_removed);
            overview.lines_written = overview.lines_written.saturating_add(day.lines_written);
        }
        overview.total_tokens = overview
            .input_tokens
            .saturating_add(overview.output_tokens)
            .saturating_add(overview.cache_read_tokens)
            .saturating_add(overview.cache_creation_tokens);

        let mut session_ids: HashSet<&str> = HashSet::new();
        for record in &self.records {
            if !Self::record_in_range(record, range) {
                continue;
            }
            let breakdown = self.pricing.cost_breakdown(record);
            overview.input_cost += breakdown.input_cost;
            overview.output_cost += breakdown.output_cost;
            overview.cache_read_cost += breakdown.cache_read_cost;
            overview.cache_creation_cost += breakdown.cache_creation_cost;
            session_ids.insert(record.session_id.as_str());
        }
        overview.sessions = session_ids.len() as u64;

        overview
    }

    /// Day buckets in range, ascending by date. Bucket path.
    pub fn daily(&self, range: DateRange) -> Vec<DailySummary> {
        let mut result: Vec<DailySummary> = self
            .daily
            .iter()
            .filter(|(date, _)| range.contains(**date))
            .map(|(date, day)| DailySummary {
                date: *date,
                input_tokens: day.input_tokens,
                output_tokens: day.output_tokens,
                cache_read_tokens: day.cache_read_tokens,
                cache_creation_tokens: day.cache_creation_tokens,
                total_cost: day.cost,
                messages: day.messages,
                sessions: day.session_ids.len() as u64,
                lines_added: day.lines_added,
                lines_removed: day.lines_removed,
                lines_written: day.lines_written,
            })
            .collect();
        result.sort_by_key(|summary| summary.date);
        result
    }

    fn session_summary(&self, session_id: &str, bucket: &SessionBucket) -> SessionSummary {
        let duration_secs = match (bucket.first_ts, bucket.last_ts) {
            (Some(first), Some(last)) => (last - first).num_seconds(),
            _ => 0,
        };
        let mut models: Vec<String> = bucket.models.iter().cloned().collect();
        models.sort();
        SessionSummary {
            session_id: session_id.to_string(),
            project: bucket.project.clone(),
            first_ts: bucket.first_ts,
            last_ts: bucket.last_ts,
            duration_secs,
            messages: bucket.messages,
            input_tokens: bucket.input_tokens,
            output_tokens: bucket.output_tokens,
            cache_read_tokens: bucket.cache_read_tokens,
            cache_creation_tokens: bucket.cache_creation_tokens,
            total_cost: bucket.cost,
            models,
            tools: bucket.tools.clone(),
            lines_added: bucket.lines_added,
            lines_removed: bucket.lines_removed,
            lines_written: bucket.lines_written,
        }
    }

    /// Sessions filtered by project, model membership, and date overlap
    /// (a session partially inside the range is included), sorted
    /// descending by first timestamp. Bucket path.
    pub fn sessions(
        &self,
        project: Option<&str>,
        model: Option<&str>,
        range: DateRange,
    ) -> Vec<SessionSummary> {
        let mut result: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|(_, bucket)| {
                if let Some(project) = project {
                    if bucket.project != project {
                        return false;
                    }
                }
                if let Some(model) = model {
                    if !bucket.models.contains(model) {
                        return false;
                    }
                }
                match (bucket.first_ts, bucket.last_ts) {
                    (Some(first), Some(last)) => range.overlaps(
                        first.with_timezone(&chrono::Local).date_naive(),
                        last.with_timezone(&chrono::Local).date_naive(),
                    ),
                    // Undated sessions only show up unfiltered
                    _ => range.is_unbounded(),
                }
            })
            .map(|(id, bucket)| self.session_summary(id, bucket))
            .collect();
        result.sort_by(|a, b| b.first_ts.cmp(&a.first_ts));
        result
    }

    /// Lookup by session id; unknown ids are an empty result, never a
    /// panic.
    pub fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions
            .get(session_id)
            .map(|bucket| self.session_summary(session_id, bucket))
    }

    /// Sessions whose last activity falls inside the trailing window — a
    /// "live now" view derived purely from in-memory state.
    pub fn active_sessions(&self, minutes: i64) -> Vec<SessionSummary> {
        self.active_sessions_at(Utc::now(), minutes)
    }

    pub fn active_sessions_at(&self, now: DateTime<Utc>, minutes: i64) -> Vec<SessionSummary> {
        let cutoff = now - Duration::minutes(minutes);
        let mut result: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|(_, bucket)| bucket.last_ts.is_some_and(|last| last >= cutoff))
            .map(|(id, bucket)| self.session_summary(id, bucket))
            .collect();
        result.sort_by(|a, b| b.last_ts.cmp(&a.last_ts));
        result
    }

    /// Projects ranked descending by token volume. Unbounded ranges serve
    /// the pre-aggregated buckets; bounded ranges re-fold the record log.
    pub fn projects(&self, range: DateRange) -> Vec<ProjectSummary> {
        let mut result: Vec<ProjectSummary> = if range.is_unbounded() {
            self.projects
                .iter()
                .map(|(project, bucket)| ProjectSummary {
                    project: project.clone(),
                    total_tokens: bucket.total_tokens,
                    total_cost: bucket.cost,
                    messages: bucket.messages,
                    sessions: bucket.session_ids.len() as u64,
                })
                .collect()
        } else {
            let mut folded: HashMap<&str, (u64, f64, u64, HashSet<&str>)> = HashMap::new();
            for record in &self.records {
                if !Self::record_in_range(record, range) {
                    continue;
                }
                let slot = folded.entry(record.project.as_str()).or_default();
                slot.0 = slot.0.saturating_add(record.total_tokens());
                slot.1 += self.pricing.cost(record);
                slot.2 += 1;
                slot.3.insert(record.session_id.as_str());
            }
            folded
                .into_iter()
                .map(|(project, (tokens, cost, messages, sessions))| ProjectSummary {
                    project: project.to_string(),
                    total_tokens: tokens,
                    total_cost: cost,
                    messages,
                    sessions: sessions.len() as u64,
                })
                .collect()
        };
        result.sort_by(|a, b| {
            b.total_tokens
                .cmp(&a.total_tokens)
                .then_with(|| a.project.cmp(&b.project))
        });
        result
    }

    /// Models ranked descending by cost. Unbounded: bucket path; bounded:
    /// record scan.
    pub fn models(&self, range: DateRange) -> Vec<ModelSummary> {
        let mut result: Vec<ModelSummary> = if range.is_unbounded() {
            self.models
                .iter()
                .map(|(model, bucket)| ModelSummary {
                    model: model.clone(),
                    input_tokens: bucket.input_tokens,
                    output_tokens: bucket.output_tokens,
                    cache_read_tokens: bucket.cache_read_tokens,
                    cache_creation_tokens: bucket.cache_creation_tokens,
                    total_cost: bucket.cost,
                    messages: bucket.messages,
                })
                .collect()
        } else {
            let mut folded: HashMap<&str, ModelBucket> = HashMap::new();
            for record in &self.records {
                if !Self::record_in_range(record, range) {
                    continue;
                }
                let slot = folded.entry(record.model.as_str()).or_default();
                slot.input_tokens = slot.input_tokens.saturating_add(record.input_tokens);
                slot.output_tokens = slot.output_tokens.saturating_add(record.output_tokens);
                slot.cache_read_tokens = slot
                    .cache_read_tokens
                    .saturating_add(record.cache_read_tokens);
                slot.cache_creation_tokens = slot
                    .cache_creation_tokens
                    .saturating_add(record.cache_creation_tokens);
                slot.cost += self.pricing.cost(record);
                slot.messages += 1;
            }
            folded
                .into_iter()
                .map(|(model, bucket)| ModelSummary {
                    model: model.to_string(),
                    input_tokens: bucket.input_tokens,
                    output_tokens: bucket.output_tokens,
                    cache_read_tokens: bucket.cache_read_tokens,
                    cache_creation_tokens: bucket.cache_creation_tokens,
                    total_cost: bucket.cost,
                    messages: bucket.messages,
                })
                .collect()
        };
        result.sort_by(|a, b| {
            b.total_cost
                .partial_cmp(&a.total_cost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });
        result
    }

    /// Tools ranked descending by call count, with each tool's share of
    /// the filtered total (0% on empty input, never a division by zero).
    /// Unbounded: flat counter; bounded: record scan.
    pub fn tools(&self, range: DateRange) -> Vec<ToolSummary> {
        let counts: HashMap<String, u64> = if range.is_unbounded() {
            self.tool_calls.clone()
        } else {
            let mut folded: HashMap<String, u64> = HashMap::new();
            for record in &self.records {
                if !Self::record_in_range(record, range) {
                    continue;
                }
                for tool in &record.tools {
                    *folded.entry(tool.clone()).or_default() += 1;
                }
            }
            folded
        };

        let total: u64 = counts.values().sum();
        let mut result: Vec<ToolSummary> = counts
            .into_iter()
            .map(|(tool, calls)| ToolSummary {
                tool,
                calls,
                percentage: if total == 0 {
                    0.0
                } else {
                    calls as f64 * 100.0 / total as f64
                },
            })
            .collect();
        result.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.tool.cmp(&b.tool)));
        result
    }

    /// Hour-of-day sums, always exactly 24 entries (all zero on an empty
    /// aggregator). Unbounded: bucket path; bounded: record scan.
    pub fn hourly(&self, range: DateRange) -> Vec<HourlySummary> {
        let mut result: Vec<HourlySummary> = (0..HOURS_PER_DAY as u32)
            .map(|hour| HourlySummary {
                hour,
                ..HourlySummary::default()
            })
            .collect();

        if range.is_unbounded() {
            for (hour, bucket) in self.hours.iter().enumerate() {
                result[hour].total_tokens = bucket.total_tokens;
                result[hour].total_cost = bucket.cost;
                result[hour].messages = bucket.messages;
            }
        } else {
            for record in &self.records {
                if !Self::record_in_range(record, range) {
                    continue;
                }
                if let Some(hour) = record.local_hour() {
                    let slot = &mut result[hour as usize];
                    slot.total_tokens = slot.total_tokens.saturating_add(record.total_tokens());
                    slot.total_cost += self.pricing.cost(record);
                    slot.messages += 1;
                }
            }
        }

        result
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(PricingTable::builtin())
    }
}
