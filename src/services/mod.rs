//! Services for rollups, pricing, and caching

pub mod aggregator;
pub mod cache;
pub mod engine;
pub mod pricing;

pub use aggregator::Aggregator;
pub use cache::{AggregatorCache, CacheConfig, RecordLoader};
pub use engine::{Engine, SessionLogLoader, DEFAULT_TENANT};
pub use pricing::{CostBreakdown, ModelPricing, PricingTable};
