//! Per-tenant aggregator cache
//!
//! Each tenant's full history lives in its own `Aggregator`, built
//! lazily on first request and kept warm until a TTL sweep evicts it.
//! Rebuilds are single-flight: concurrent requests for the same tenant
//! wait on one build instead of racing their own.

use crate::services::aggregator::Aggregator;
use crate::services::pricing::PricingTable;
use crate::types::{Record, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Source of a tenant's full record history. Implemented over the log
/// parser in production and stubbed in tests.
pub trait RecordLoader: Send + Sync + 'static {
    fn load_all(&self, tenant: &str) -> Result<Vec<Record>>;
}

impl<F> RecordLoader for F
where
    F: Fn(&str) -> Result<Vec<Record>> + Send + Sync + 'static,
{
    fn load_all(&self, tenant: &str) -> Result<Vec<Record>> {
        self(tenant)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Idle time after which a tenant's aggregator is dropped.
    pub ttl: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

struct Built {
    aggregator: Arc<Aggregator>,
    last_access: Instant,
}

/// One tenant's slot. The mutex is the single-flight gate: it is held
/// for the whole rebuild, so followers block here rather than loading
/// the history themselves. The outer map lock is never held across a
/// build.
struct Slot {
    inner: Mutex<Option<Built>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

pub struct AggregatorCache {
    loader: Arc<dyn RecordLoader>,
    pricing: PricingTable,
    config: CacheConfig,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl AggregatorCache {
    pub fn new(loader: Arc<dyn RecordLoader>, pricing: PricingTable, config: CacheConfig) -> Self {
        Self {
            loader,
            pricing,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The tenant's aggregator, rebuilding from full history on a miss.
    ///
    /// A hit refreshes the TTL clock. A failed build leaves no slot
    /// behind, so the next request retries instead of caching the error.
    pub async fn get(&self, tenant: &str) -> Result<Arc<Aggregator>> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(tenant.to_string())
                .or_insert_with(|| Arc::new(Slot::empty()))
                .clone()
        };

        let mut guard = slot.inner.lock().await;
        if let Some(built) = guard.as_mut() {
            built.last_access = Instant::now();
            return Ok(built.aggregator.clone());
        }

        match self.build(tenant) {
            Ok(aggregator) => {
                let aggregator = Arc::new(aggregator);
                *guard = Some(Built {
                    aggregator: aggregator.clone(),
                    last_access: Instant::now(),
                });
                Ok(aggregator)
            }
            Err(e) => {
                drop(guard);
                let mut slots = self.slots.lock().await;
                if let Some(current) = slots.get(tenant) {
                    if Arc::ptr_eq(current, &slot) {
                        slots.remove(tenant);
                    }
                }
                Err(e)
            }
        }
    }

    fn build(&self, tenant: &str) -> Result<Aggregator> {
        let records = self.loader.load_all(tenant)?;
        let mut aggregator = Aggregator::new(self.pricing.clone());
        aggregator.add_records(records);
        Ok(aggregator)
    }

    /// Drop one tenant's cached state; the next `get` rebuilds.
    pub async fn invalidate(&self, tenant: &str) {
        self.slots.lock().await.remove(tenant);
    }

    pub async fn invalidate_all(&self) {
        self.slots.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Drop slots idle past the TTL. Slots mid-build (inner mutex held)
    /// are in active use and survive the sweep. Returns how many were
    /// evicted.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                Some(built) => now.duration_since(built.last_access) < self.config.ttl,
                None => false,
            },
            Err(_) => true,
        });
        before - slots.len()
    }

    /// Background TTL sweeper. Runs until the returned handle is aborted
    /// or the runtime shuts down.
    pub fn spawn_eviction_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut interval = tokio::time::interval(cache.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let evicted = cache.evict_idle().await;
                if evicted > 0 {
                    eprintln!("[tokroll] Evicted {} idle tenant cache(s)", evicted);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokrollError;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubLoader {
        loads: AtomicUsize,
        fail_first: bool,
        delay: Option<Duration>,
    }

    impl StubLoader {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_first: false,
                delay: None,
            }
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl RecordLoader for StubLoader {
        fn load_all(&self, tenant: &str) -> Result<Vec<Record>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(TokrollError::Loader("transient".to_string()));
            }
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            Ok(vec![Record {
                id: format!("{}-r1", tenant),
                timestamp: Some(Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap()),
                model: "claude-sonnet-4".to_string(),
                session_id: format!("{}-sess", tenant),
                project: tenant.to_string(),
                input_tokens: 100,
                output_tokens: 50,
                cache_read_tokens: 0,
                cache_creation_tokens: 0,
                tools: HashSet::new(),
                stop_reason: None,
                lines_added: 0,
                lines_removed: 0,
                lines_written: 0,
            }])
        }
    }

    fn make_cache(loader: Arc<StubLoader>, config: CacheConfig) -> AggregatorCache {
        AggregatorCache::new(loader, PricingTable::builtin(), config)
    }

    #[tokio::test]
    async fn test_hit_reuses_built_aggregator() {
        let loader = Arc::new(StubLoader::new());
        let cache = make_cache(loader.clone(), CacheConfig::default());

        let first = cache.get("acme").await.unwrap();
        let second = cache.get("acme").await.unwrap();

        assert_eq!(loader.loads(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let loader = Arc::new(StubLoader::new());
        let cache = make_cache(loader.clone(), CacheConfig::default());

        let a = cache.get("acme").await.unwrap();
        let b = cache.get("globex").await.unwrap();

        assert_eq!(loader.loads(), 2);
        assert_eq!(cache.len().await, 2);
        assert_eq!(a.records()[0].project, "acme");
        assert_eq!(b.records()[0].project, "globex");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_concurrent_misses() {
        let loader = Arc::new(StubLoader {
            loads: AtomicUsize::new(0),
            fail_first: false,
            delay: Some(Duration::from_millis(50)),
        });
        let cache = Arc::new(make_cache(loader.clone(), CacheConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(
                async move { cache.get("acme").await.unwrap() },
            ));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(loader.loads(), 1, "followers must wait, not rebuild");
    }

    #[tokio::test]
    async fn test_rebuild_reflects_new_data() {
        // Loader output grows between builds, standing in for records
        // persisted out-of-band between invalidations.
        let builds = Arc::new(AtomicUsize::new(0));
        let builds_in = Arc::clone(&builds);
        let loader = move |tenant: &str| -> Result<Vec<Record>> {
            let n = builds_in.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((0..n)
                .map(|i| Record {
                    id: format!("r{}", i),
                    timestamp: Some(Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap()),
                    model: "claude-sonnet-4".to_string(),
                    session_id: "sess".to_string(),
                    project: tenant.to_string(),
                    input_tokens: 10,
                    output_tokens: 5,
                    cache_read_tokens: 0,
                    cache_creation_tokens: 0,
                    tools: HashSet::new(),
                    stop_reason: None,
                    lines_added: 0,
                    lines_removed: 0,
                    lines_written: 0,
                })
                .collect())
        };
        let cache = AggregatorCache::new(
            Arc::new(loader),
            PricingTable::builtin(),
            CacheConfig::default(),
        );

        assert_eq!(cache.get("acme").await.unwrap().len(), 1);
        cache.invalidate("acme").await;
        assert_eq!(cache.get("acme").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let loader = Arc::new(StubLoader::new());
        let cache = make_cache(loader.clone(), CacheConfig::default());

        cache.get("acme").await.unwrap();
        cache.invalidate("acme").await;
        cache.get("acme").await.unwrap();

        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_is_retried() {
        let loader = Arc::new(StubLoader {
            loads: AtomicUsize::new(0),
            fail_first: true,
            delay: None,
        });
        let cache = make_cache(loader.clone(), CacheConfig::default());

        assert!(cache.get("acme").await.is_err());
        assert!(cache.is_empty().await, "failed build must not leave a slot");

        let agg = cache.get("acme").await.unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_evict_idle_drops_expired_slots() {
        let loader = Arc::new(StubLoader::new());
        let config = CacheConfig {
            ttl: Duration::from_millis(0),
            sweep_interval: Duration::from_secs(300),
        };
        let cache = make_cache(loader.clone(), config);

        cache.get("acme").await.unwrap();
        assert_eq!(cache.len().await, 1);

        let evicted = cache.evict_idle().await;
        assert_eq!(evicted, 1);
        assert!(cache.is_empty().await);

        // Next request rebuilds transparently
        cache.get("acme").await.unwrap();
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_evict_keeps_fresh_slots() {
        let loader = Arc::new(StubLoader::new());
        let cache = make_cache(loader.clone(), CacheConfig::default());

        cache.get("acme").await.unwrap();
        let evicted = cache.evict_idle().await;
        assert_eq!(evicted, 0);
        assert_eq!(cache.len().await, 1);
    }
}
