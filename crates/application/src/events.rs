//! 连接上收发的事件。
//!
//! 线上格式为 `{"event": "<名称>", "data": <负载>}`，事件名与字段使用 camelCase。

use domain::{
    ConversationTarget, DomainError, Message, MessageId, MessageStatus, RoomId, UserId, Username,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 客户端发来的事件（断开由传输层表示，不在此枚举中）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    JoinRoom(TargetPayload),
    LeaveRoom(TargetPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub content: String,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
}

impl SendMessagePayload {
    pub fn target(&self) -> Result<ConversationTarget, DomainError> {
        ConversationTarget::from_parts(self.room_id, self.receiver_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPayload {
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
}

impl TargetPayload {
    pub fn room(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            receiver_id: None,
        }
    }

    pub fn direct(receiver_id: UserId) -> Self {
        Self {
            room_id: None,
            receiver_id: Some(receiver_id),
        }
    }

    pub fn target(&self) -> Result<ConversationTarget, DomainError> {
        ConversationTarget::from_parts(self.room_id, self.receiver_id)
    }
}

/// 服务端推送给连接的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageStatusUpdate(StatusUpdate),
    RecentMessages(Vec<Message>),
    UserStatus(UserStatusChange),
    OnlineUsers(Vec<OnlineUser>),
    RateLimitUpdated(Vec<Uuid>),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn status_update(message: &Message) -> Self {
        ServerEvent::MessageStatusUpdate(StatusUpdate {
            message_id: Some(message.id),
            status: message.status,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusChange {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: UserId,
    pub username: Username,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
