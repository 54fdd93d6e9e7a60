//! 领域模型错误定义
//!
//! 定义了领域层与存储适配器共享的错误类型。

use thiserror::Error;

use crate::message::MessageStatus;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 消息状态只能按 sent → delivered → seen 前进
    #[error("illegal status transition: {from} -> {to}")]
    IllegalStatusTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    /// roomId 与 receiverId 必须且只能设置一个
    #[error("exactly one of roomId or receiverId must be set")]
    InvalidConversationTarget,
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 记录存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    Conflict,

    #[error("storage unavailable: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
