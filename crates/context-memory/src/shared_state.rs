//! Shared state for the session layer
//!
//! One [`ConversationMemory`] per active session lives in a concurrent map so
//! that independent sessions never contend on a single lock.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::context_engine::{ConversationMemory, MemoryOptions};
use crate::memory_db::MemoryDatabase;

/// Lock-free counters for cache activity.
#[derive(Default)]
pub struct AtomicCounters {
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub evictions: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_cache_hit(&self) -> usize {
        self.cache_hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_cache_miss(&self) -> usize {
        self.cache_misses.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_evictions(&self, n: usize) -> usize {
        self.evictions.fetch_add(n, Ordering::Relaxed) + n
    }
}

/// Process-wide registry of per-session memories.
pub struct SessionMemoryCache {
    sessions: DashMap<String, Arc<ConversationMemory>>,
    database: Arc<MemoryDatabase>,
    options: MemoryOptions,
    pub counters: Arc<AtomicCounters>,
}

impl SessionMemoryCache {
    pub fn new(database: Arc<MemoryDatabase>, options: MemoryOptions) -> Self {
        Self {
            sessions: DashMap::new(),
            database,
            options,
            counters: Arc::new(AtomicCounters::new()),
        }
    }

    /// The memory for `session_id`, created on first use.
    ///
    /// Lookup and insertion happen under the same shard lock, so concurrent
    /// first requests for one session all receive the same instance.
    pub fn get_or_create(&self, session_id: &str) -> Arc<ConversationMemory> {
        if let Some(existing) = self.sessions.get(session_id) {
            self.counters.inc_cache_hit();
            return Arc::clone(existing.value());
        }

        let entry = self.sessions.entry(session_id.to_string()).or_insert_with(|| {
            self.counters.inc_cache_miss();
            debug!("Creating conversation memory for session {}", session_id);
            Arc::new(ConversationMemory::new(
                session_id,
                Arc::clone(&self.database),
                self.options,
            ))
        });
        Arc::clone(entry.value())
    }

    /// Drop the cached instance. Stored data is untouched.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict sessions idle for at least `max_idle`. Returns how many went.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, memory| memory.idle_for() < max_idle);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            self.counters.add_evictions(evicted);
            info!("Evicted {} idle session memories", evicted);
        }
        evicted
    }
}
