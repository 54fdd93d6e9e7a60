//! Redis 计数器存储
//!
//! 限流计数使用 `GET` / `SET key value EX ttl`，每次写入都会重置过期时间。

use std::time::Duration;

use application::{CounterStore, CounterStoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

/// 基于 Redis 的计数器存储
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    /// 连接 Redis。`ConnectionManager` 会在连接断开后自动重连。
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(url).map_err(map_redis_err)?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(map_redis_err)?;
        tracing::info!("Redis 计数器存储已连接");
        Ok(Self { connection })
    }

    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

fn map_redis_err(err: redis::RedisError) -> CounterStoreError {
    CounterStoreError::Unavailable(err.to_string())
}

/// `EX` 至少为 1 秒
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, CounterStoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        value
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| CounterStoreError::InvalidValue(format!("{key}={raw}")))
            })
            .transpose()
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), CounterStoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
