use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid counter value: {0}")]
    InvalidValue(String),
}

/// 带过期语义的外部键值计数器存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>, CounterStoreError>;

    /// 写入并把过期时间重置为 `ttl`（EX 语义）
    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), CounterStoreError>;
}
