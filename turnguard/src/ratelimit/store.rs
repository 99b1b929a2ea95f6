// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Counter store abstraction for the sliding-window log.
//
// Any ordered-set store offering the five primitives below can back the
// limiter. `record_if_below` composes them by default; stores that can
// hold one lock across the whole check override it. Scores are microseconds since the Unix epoch as reported by
// the store itself, so instances with skewed clocks still agree.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store returned an unexpected reply: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// CounterStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current time according to the store, in microseconds.
    async fn now_micros(&self) -> Result<u64, CounterStoreError>;

    /// Remove every entry of `key` scored at or below `max_score`.
    async fn remove_by_score(&self, key: &str, max_score: u64) -> Result<u64, CounterStoreError>;

    async fn count(&self, key: &str) -> Result<u64, CounterStoreError>;

    async fn add(&self, key: &str, member: &str, score: u64) -> Result<(), CounterStoreError>;

    /// Set the key's time-to-live, replacing any previous expiry.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterStoreError>;

    /// Trim entries scored at or below `window_start`, then record `member`
    /// at `now` if fewer than `limit` remain. Returns the count seen before
    /// recording, or `None` when the key is at its limit.
    async fn record_if_below(
        &self,
        key: &str,
        window_start: u64,
        now: u64,
        member: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CounterStoreError> {
        self.remove_by_score(key, window_start).await?;
        let count = self.count(key).await?;
        if count >= limit {
            return Ok(None);
        }
        self.add(key, member, now).await?;
        self.expire(key, ttl).await?;
        Ok(Some(count))
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for the in-process store.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests and benches.
#[derive(Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn starting_at(micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(micros),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// InMemoryCounterStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScoredSet {
    entries: BTreeSet<(u64, String)>,
    expires_at: Option<u64>,
}

/// Single-process counter store backed by `DashMap`.
///
/// Suitable for one instance. Multiple instances behind a balancer need a
/// shared store such as `RedisCounterStore`.
pub struct InMemoryCounterStore {
    sets: DashMap<String, ScoredSet>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: DashMap::new(),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_micros();
        self.sets
            .iter()
            .filter(|entry| !is_expired(entry.value(), now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_if_expired(&self, key: &str) {
        let now = self.clock.now_micros();
        self.sets.remove_if(key, |_, set| is_expired(set, now));
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(set: &ScoredSet, now: u64) -> bool {
    set.expires_at.is_some_and(|at| at <= now)
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn now_micros(&self) -> Result<u64, CounterStoreError> {
        Ok(self.clock.now_micros())
    }

    async fn remove_by_score(&self, key: &str, max_score: u64) -> Result<u64, CounterStoreError> {
        self.evict_if_expired(key);
        let Some(mut set) = self.sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.entries.len();
        set.entries.retain(|(score, _)| *score > max_score);
        Ok((before - set.entries.len()) as u64)
    }

    async fn count(&self, key: &str) -> Result<u64, CounterStoreError> {
        self.evict_if_expired(key);
        Ok(self
            .sets
            .get(key)
            .map(|set| set.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn add(&self, key: &str, member: &str, score: u64) -> Result<(), CounterStoreError> {
        self.evict_if_expired(key);
        self.sets
            .entry(key.to_string())
            .or_default()
            .entries
            .insert((score, member.to_string()));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterStoreError> {
        let at = self.clock.now_micros() + ttl.as_micros() as u64;
        if let Some(mut set) = self.sets.get_mut(key) {
            set.expires_at = Some(at);
        }
        Ok(())
    }

    async fn record_if_below(
        &self,
        key: &str,
        window_start: u64,
        now: u64,
        member: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CounterStoreError> {
        let clock_now = self.clock.now_micros();
        let admitted = {
            // The entry guard holds the shard lock until the decision is recorded.
            let mut set = self.sets.entry(key.to_string()).or_default();
            if is_expired(&set, clock_now) {
                set.entries.clear();
                set.expires_at = None;
            }
            set.entries.retain(|(score, _)| *score > window_start);
            let count = set.entries.len() as u64;
            if count < limit {
                set.entries.insert((now, member.to_string()));
                set.expires_at = Some(clock_now + ttl.as_micros() as u64);
                Some(count)
            } else {
                None
            }
        };
        if admitted.is_none() {
            self.sets.remove_if(key, |_, set| set.entries.is_empty());
        }
        Ok(admitted)
    }
}
