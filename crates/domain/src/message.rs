use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 消息投递状态：sent → delivered → seen。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Seen => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
        }
    }

    /// 前进方向的转换总是合法的（包括创建时 sent 直接到 seen）。
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }

    /// 唯一的回退边：delivered → sent，仅在断线回退时使用。
    pub fn regress(self) -> Result<MessageStatus, DomainError> {
        match self {
            MessageStatus::Delivered => Ok(MessageStatus::Sent),
            other => Err(DomainError::IllegalStatusTransition {
                from: other,
                to: MessageStatus::Sent,
            }),
        }
    }

    /// 新消息创建时根据接收方的状态决定初始状态。
    pub fn on_creation(recipient: RecipientState) -> MessageStatus {
        match recipient {
            RecipientState::Absent => MessageStatus::Sent,
            RecipientState::BoundElsewhere => MessageStatus::Delivered,
            RecipientState::ViewingSender => MessageStatus::Seen,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "seen" => Ok(MessageStatus::Seen),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown message status '{other}'"),
            )),
        }
    }
}

/// 消息发送时接收方的可达情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientState {
    /// 不在线（私聊）或房间内没有其他绑定的连接
    Absent,
    /// 在线，但当前会话不是与发送者的对话
    BoundElsewhere,
    /// 正在查看与发送者的对话
    ViewingSender,
}

/// 一条连接当前查看的会话：房间或某个对端用户。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationTarget {
    Room(RoomId),
    Direct(UserId),
}

impl ConversationTarget {
    /// 由线上事件中的 roomId / receiverId 构造，二者必须恰好出现一个。
    pub fn from_parts(
        room_id: Option<RoomId>,
        receiver_id: Option<UserId>,
    ) -> Result<Self, DomainError> {
        match (room_id, receiver_id) {
            (Some(room_id), None) => Ok(ConversationTarget::Room(room_id)),
            (None, Some(receiver_id)) => Ok(ConversationTarget::Direct(receiver_id)),
            _ => Err(DomainError::InvalidConversationTarget),
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            ConversationTarget::Room(_) => TargetKind::Room,
            ConversationTarget::Direct(_) => TargetKind::Direct,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        match self {
            ConversationTarget::Room(room_id) => room_id.0,
            ConversationTarget::Direct(user_id) => user_id.0,
        }
    }
}

impl fmt::Display for ConversationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationTarget::Room(room_id) => write!(f, "room:{room_id}"),
            ConversationTarget::Direct(user_id) => write!(f, "direct:{user_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Room,
    Direct,
}

/// 已持久化的消息记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub room_id: Option<RoomId>,
    pub content: MessageContent,
    pub status: MessageStatus,
    pub created_at: Timestamp,
}

impl Message {
    /// 新消息总是以 sent 状态创建。
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        target: ConversationTarget,
        content: MessageContent,
        created_at: Timestamp,
    ) -> Self {
        let (room_id, receiver_id) = match target {
            ConversationTarget::Room(room_id) => (Some(room_id), None),
            ConversationTarget::Direct(receiver_id) => (None, Some(receiver_id)),
        };
        Self {
            id,
            sender_id,
            receiver_id,
            room_id,
            content,
            status: MessageStatus::Sent,
            created_at,
        }
    }

    pub fn target(&self) -> Result<ConversationTarget, DomainError> {
        ConversationTarget::from_parts(self.room_id, self.receiver_id)
    }

    pub fn advance(&mut self, next: MessageStatus) -> Result<(), DomainError> {
        if !self.status.can_advance_to(next) {
            return Err(DomainError::IllegalStatusTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn regress(&mut self) -> Result<(), DomainError> {
        self.status = self.status.regress()?;
        Ok(())
    }
}
