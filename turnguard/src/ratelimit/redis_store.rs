// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Redis-backed counter store: one sorted set per rate key.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use super::store::{CounterStore, CounterStoreError};

pub struct RedisCounterStore {
    pool: Pool,
}

impl RedisCounterStore {
    pub fn new(url: &str, pool_max: usize) -> Result<Self, CounterStoreError> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CounterStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| CounterStoreError::Unavailable(e.to_string()))
    }
}

impl Clone for RedisCounterStore {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

fn unavailable(e: redis::RedisError) -> CounterStoreError {
    CounterStoreError::Unavailable(e.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn now_micros(&self) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection().await?;
        let (secs, micros): (u64, u64) = redis::cmd("TIME")
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterStoreError::Protocol(e.to_string()))?;
        Ok(secs * 1_000_000 + micros)
    }

    async fn remove_by_score(&self, key: &str, max_score: u64) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection().await?;
        conn.zrembyscore::<_, _, _, u64>(key, 0u64, max_score)
            .await
            .map_err(unavailable)
    }

    async fn count(&self, key: &str) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection().await?;
        conn.zcard::<_, u64>(key).await.map_err(unavailable)
    }

    async fn add(&self, key: &str, member: &str, score: u64) -> Result<(), CounterStoreError> {
        let mut conn = self.connection().await?;
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(unavailable)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterStoreError> {
        let mut conn = self.connection().await?;
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(unavailable)
    }
}
