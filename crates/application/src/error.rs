use std::time::Duration;

use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::counter_store::CounterStoreError;
use crate::credentials::CredentialError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    /// 记录存储不可用（持久化失败）
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("counter store error: {0}")]
    CounterStore(#[from] CounterStoreError),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl ApplicationError {
    pub fn authentication(message: impl Into<String>) -> Self {
        ApplicationError::Authentication(message.into())
    }

    /// 发给客户端 `error` 事件的文本，不泄露存储细节
    pub fn client_message(&self) -> String {
        match self {
            ApplicationError::Domain(err) => err.to_string(),
            ApplicationError::Repository(_) => "message could not be processed".to_string(),
            ApplicationError::CounterStore(_) => "temporarily unavailable".to_string(),
            ApplicationError::Authentication(_) => "Authentication error".to_string(),
            ApplicationError::RateLimited { .. } | ApplicationError::InvalidEvent(_) => {
                self.to_string()
            }
        }
    }
}

impl From<CredentialError> for ApplicationError {
    fn from(value: CredentialError) -> Self {
        ApplicationError::Authentication(value.to_string())
    }
}
