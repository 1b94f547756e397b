//! Engine: owns the tenant cache and the production record loader.
//!
//! The serving layer holds one `Engine` and asks it for aggregators;
//! single-tenant deployments just use the default tenant key and never
//! think about tenancy.

use crate::parsers::SessionLogParser;
use crate::services::aggregator::Aggregator;
use crate::services::cache::{AggregatorCache, CacheConfig, RecordLoader};
use crate::services::pricing::PricingTable;
use crate::types::{Record, Result};
use std::sync::Arc;

/// Tenant key used when no multi-tenant routing is in play.
pub const DEFAULT_TENANT: &str = "default";

/// Loads full history by parsing every discovered session log. All
/// tenants share one data directory here; multi-tenant deployments
/// supply their own `RecordLoader` that routes by tenant.
pub struct SessionLogLoader {
    parser: SessionLogParser,
}

impl SessionLogLoader {
    pub fn new(parser: SessionLogParser) -> Self {
        Self { parser }
    }
}

impl RecordLoader for SessionLogLoader {
    fn load_all(&self, _tenant: &str) -> Result<Vec<Record>> {
        let logs = self.parser.discover_logs();
        Ok(self.parser.parse_files(&logs))
    }
}

pub struct Engine {
    cache: Arc<AggregatorCache>,
}

impl Engine {
    /// Engine over the default data directory with built-in pricing.
    pub fn new() -> Self {
        Self::with_loader(
            Arc::new(SessionLogLoader::new(SessionLogParser::new())),
            PricingTable::builtin(),
            CacheConfig::default(),
        )
    }

    pub fn with_loader(
        loader: Arc<dyn RecordLoader>,
        pricing: PricingTable,
        config: CacheConfig,
    ) -> Self {
        Self {
            cache: Arc::new(AggregatorCache::new(loader, pricing, config)),
        }
    }

    /// The default tenant's aggregator (see `aggregator_for`).
    pub async fn aggregator(&self) -> Result<Arc<Aggregator>> {
        self.aggregator_for(DEFAULT_TENANT).await
    }

    /// A tenant's full-history aggregator, rebuilt lazily on miss and
    /// shared by all queries until invalidated or evicted.
    pub async fn aggregator_for(&self, tenant: &str) -> Result<Arc<Aggregator>> {
        self.cache.get(tenant).await
    }

    /// Force a rebuild on the next request (e.g. after log files change).
    pub async fn invalidate(&self, tenant: &str) {
        self.cache.invalidate(tenant).await;
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all().await;
    }

    /// Start the background TTL sweep for idle tenant caches.
    pub fn spawn_eviction_task(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_eviction_task()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DateRange;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn stub_record(id: &str) -> Record {
        Record {
            id: id.to_string(),
            timestamp: Some(Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap()),
            model: "claude-sonnet-4".to_string(),
            session_id: "sess-1".to_string(),
            project: "code/app".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            tools: HashSet::new(),
            stop_reason: None,
            lines_added: 0,
            lines_removed: 0,
            lines_written: 0,
        }
    }

    fn stub_engine() -> Engine {
        let loader =
            |_tenant: &str| -> Result<Vec<Record>> { Ok(vec![stub_record("r1"), stub_record("r2")]) };
        Engine::with_loader(
            Arc::new(loader),
            PricingTable::builtin(),
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_default_tenant_identity() {
        let engine = stub_engine();
        let first = engine.aggregator().await.unwrap();
        let second = engine.aggregator().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_queries_through_engine() {
        let engine = stub_engine();
        let agg = engine.aggregator().await.unwrap();

        let overview = agg.overview(DateRange::unbounded());
        assert_eq!(overview.messages, 2);
        assert_eq!(overview.sessions, 1);
        assert_eq!(agg.daily(DateRange::unbounded()).len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_rebuilds_fresh_arc() {
        let engine = stub_engine();
        let first = engine.aggregator().await.unwrap();
        engine.invalidate(DEFAULT_TENANT).await;
        let second = engine.aggregator().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), first.len());
    }

    #[tokio::test]
    async fn test_session_log_loader_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let loader =
            SessionLogLoader::new(SessionLogParser::with_data_dir(dir.path().to_path_buf()));
        let records = loader.load_all(DEFAULT_TENANT).unwrap();
        assert!(records.is_empty());
    }
}
