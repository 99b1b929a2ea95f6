// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Sliding-window-log admission control
//
// Responsibilities:
// - Per-key log of request timestamps in a shared CounterStore
// - Trim entries older than the window, count, then record or deny, as one
//   store operation
// - Two subjects per turn (client IP, then user) must both pass
// - Store failure fails open with a logged warning

mod redis_store;
mod store;

pub use self::redis_store::RedisCounterStore;
pub use self::store::{
    Clock, CounterStore, CounterStoreError, InMemoryCounterStore, ManualClock, SystemClock,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::RateLimitConfig;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Ip,
    User,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Ip => "ip",
            SubjectKind::User => "user",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateKey {
    pub kind: SubjectKind,
    pub id: String,
}

impl RateKey {
    pub fn ip(addr: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Ip,
            id: addr.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            id: id.into(),
        }
    }

    /// Counter-store key, e.g. `rate_limit:ip:10.0.0.1`.
    pub fn store_key(&self) -> String {
        format!("rate_limit:{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Limits applied by `RateLimiter::admit`.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub per_ip: u32,
    pub per_user: u32,
    pub window: Duration,
}

impl From<&RateLimitConfig> for RatePolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            per_ip: config.per_ip,
            per_user: config.per_user,
            window: Duration::from_secs(config.window_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for {kind}")]
pub struct RateLimited {
    pub kind: SubjectKind,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: RatePolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: RatePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    /// Check one key against `limit` requests per `window`.
    ///
    /// A denied attempt is not recorded. If the store cannot be reached the
    /// request is allowed with `remaining = limit`.
    pub async fn check(&self, key: &RateKey, limit: u32, window: Duration) -> RateDecision {
        match self.try_check(key, limit, window).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    subject = key.kind.as_str(),
                    error = %e,
                    "rate limit store unavailable, failing open"
                );
                RateDecision {
                    allowed: true,
                    remaining: limit,
                }
            }
        }
    }

    async fn try_check(
        &self,
        key: &RateKey,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, CounterStoreError> {
        let store_key = key.store_key();
        let now = self.store.now_micros().await?;
        let window_start = now.saturating_sub(window.as_micros() as u64);

        let member = format!("{now}-{}", Uuid::new_v4().simple());

        let recorded = self
            .store
            .record_if_below(&store_key, window_start, now, &member, u64::from(limit), window)
            .await?;

        Ok(match recorded {
            Some(count) => RateDecision {
                allowed: true,
                remaining: limit.saturating_sub(count as u32).saturating_sub(1),
            },
            None => RateDecision {
                allowed: false,
                remaining: 0,
            },
        })
    }

    /// Admit a turn: IP first, then user. Both must pass.
    ///
    /// A denied IP check returns before the user key is touched. The
    /// returned decision carries the lower of the two remaining budgets.
    pub async fn admit(&self, ip: &str, user_id: &str) -> Result<RateDecision, RateLimited> {
        let by_ip = self
            .check(&RateKey::ip(ip), self.policy.per_ip, self.policy.window)
            .await;
        if !by_ip.allowed {
            tracing::info!(subject = "ip", verdict = "deny", "rate limited");
            return Err(RateLimited {
                kind: SubjectKind::Ip,
            });
        }

        let by_user = self
            .check(&RateKey::user(user_id), self.policy.per_user, self.policy.window)
            .await;
        if !by_user.allowed {
            tracing::info!(subject = "user", verdict = "deny", "rate limited");
            return Err(RateLimited {
                kind: SubjectKind::User,
            });
        }

        Ok(RateDecision {
            allowed: true,
            remaining: by_ip.remaining.min(by_user.remaining),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
