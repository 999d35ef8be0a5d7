use indexmap::IndexMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::database::store::{Document, DocumentStore, Query};
use crate::error::Result;

/// Semantic category of a query; each has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCategory {
    TestHistory,
    Folders,
    Profile,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl: Duration,
    pub test_history_ttl: Duration,
    pub folders_ttl: Duration,
    pub profile_ttl: Duration,
    pub slow_query_threshold: Duration,
    pub max_slow_queries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            default_ttl: Duration::from_secs(5 * 60),
            test_history_ttl: Duration::from_secs(2 * 60),
            folders_ttl: Duration::from_secs(10 * 60),
            profile_ttl: Duration::from_secs(5 * 60),
            slow_query_threshold: Duration::from_secs(2),
            max_slow_queries: 50,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::TestHistory => self.test_history_ttl,
            CacheCategory::Folders => self.folders_ttl,
            CacheCategory::Profile => self.profile_ttl,
            CacheCategory::Default => self.default_ttl,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub query: Query,
    pub category: CacheCategory,
    pub use_cache: bool,
}

impl QueryOptions {
    pub fn new(query: Query, category: CacheCategory) -> Self {
        Self {
            query,
            category,
            use_cache: true,
        }
    }

    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub documents: Arc<Vec<Document>>,
    pub from_cache: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowQuery {
    pub key: String,
    pub elapsed_ms: u64,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub average_latency_ms: f64,
    pub cache_size: usize,
    pub evictions: u64,
    pub slow_queries: Vec<SlowQuery>,
}

impl QueryStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_queries as f64
        }
    }
}

struct CacheEntry {
    documents: Arc<Vec<Document>>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.inserted_at + self.ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    total_queries: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_latency: Duration,
    evictions: u64,
    slow_queries: VecDeque<SlowQuery>,
}

#[derive(Clone)]
pub struct QueryCache {
    store: Arc<dyn DocumentStore>,
    config: CacheConfig,
    state: Arc<Mutex<CacheState>>,
}

impl QueryCache {
    pub fn new(store: Arc<dyn DocumentStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|p| {
            tracing::warn!("query cache mutex poisoned, recovering");
            p.into_inner()
        })
    }

    pub async fn execute_query(&self, options: QueryOptions) -> Result<QueryOutcome> {
        let key = options.query.cache_key();
        let started = Instant::now();

        if options.use_cache {
            if let Some(documents) = self.lookup(&key, started) {
                let elapsed = started.elapsed();
                self.record(&key, elapsed, true);
                tracing::debug!(key = %key, "query cache hit");
                return Ok(QueryOutcome {
                    documents,
                    from_cache: true,
                    elapsed,
                });
            }
        }

        let documents = Arc::new(self.store.query(&options.query).await?);
        let elapsed = started.elapsed();
        if options.use_cache {
            self.insert(key.clone(), documents.clone(), self.config.ttl_for(options.category));
        }
        self.record(&key, elapsed, false);
        tracing::debug!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "query cache miss");

        Ok(QueryOutcome {
            documents,
            from_cache: false,
            elapsed,
        })
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<Arc<Vec<Document>>> {
        let mut state = self.lock();
        let live = state.entries.get(key).map(|e| e.is_live(now))?;
        if live {
            state.entries.get(key).map(|e| e.documents.clone())
        } else {
            state.entries.shift_remove(key);
            None
        }
    }

    fn insert(&self, key: String, documents: Arc<Vec<Document>>, ttl: Duration) {
        let mut state = self.lock();
        // Re-inserting moves the key to the back of the insertion order.
        state.entries.shift_remove(&key);
        while state.entries.len() >= self.config.max_entries.max(1) {
            if state.entries.shift_remove_index(0).is_none() {
                break;
            }
            state.evictions += 1;
        }
        state.entries.insert(
            key,
            CacheEntry {
                documents,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    fn record(&self, key: &str, elapsed: Duration, hit: bool) {
        let mut state = self.lock();
        state.total_queries += 1;
        if hit {
            state.cache_hits += 1;
        } else {
            state.cache_misses += 1;
        }
        state.total_latency += elapsed;

        if elapsed > self.config.slow_query_threshold {
            tracing::warn!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "slow query");
            if state.slow_queries.len() >= self.config.max_slow_queries.max(1) {
                state.slow_queries.pop_front();
            }
            state.slow_queries.push_back(SlowQuery {
                key: key.to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
                recorded_at: chrono::Utc::now(),
            });
        }
    }

    /// Removes every entry whose key contains `pattern`. Returns how many.
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::debug!(pattern, removed, "invalidated cached queries");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Drops entries whose TTL has elapsed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn stats(&self) -> QueryStats {
        let state = self.lock();
        let average_latency_ms = if state.total_queries == 0 {
            0.0
        } else {
            state.total_latency.as_secs_f64() * 1000.0 / state.total_queries as f64
        };
        QueryStats {
            total_queries: state.total_queries,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            average_latency_ms,
            cache_size: state.entries.len(),
            evictions: state.evictions,
            slow_queries: state.slow_queries.iter().cloned().collect(),
        }
    }

    /// Runs `sweep_expired` every `every` until the task is dropped.
    pub async fn run_sweeper(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = self.sweep_expired();
            if removed > 0 {
                tracing::info!(removed, remaining = self.len(), "swept expired query cache entries");
            }
        }
    }
}
