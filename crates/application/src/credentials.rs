use domain::{UserId, Username};
use thiserror::Error;

/// 通过凭据校验后的用户身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub username: Username,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// 外部凭据校验器（令牌签发不在本核心范围内）
pub trait CredentialValidator: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthenticatedUser, CredentialError>;
}
