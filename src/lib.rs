//! tokroll: incremental usage rollups for coding-agent session logs.
//!
//! Parses append-only JSONL session logs into deduplicated usage
//! records, folds them into in-memory rollups (daily, per-session,
//! per-project, per-model, hourly, per-tool), and caches one aggregator
//! per tenant with lazy rebuild and TTL eviction. A serving layer (HTTP,
//! TUI, CLI) sits on top; this crate is the computation core.

pub mod parsers;
pub mod services;
pub mod types;

pub use services::{Aggregator, AggregatorCache, Engine, PricingTable};
pub use types::{Record, Result, TokrollError};
