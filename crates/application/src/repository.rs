use async_trait::async_trait;
use domain::{ChatRoom, Message, MessageId, MessageStatus, RepositoryError, RoomId, User, UserId};

#[async_trait]
pub trait UserRepository: Send + Sync {
    // 除指定用户外的所有用户，按用户名排序
    async fn find_users_except(&self, id: UserId) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_rooms_for_user(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RepositoryError>;

    async fn find_room_membership(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError>;

    // 已是成员时不做任何修改，返回是否新插入
    async fn ensure_room_membership(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<bool, RepositoryError>;
}

/// 消息查询范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageScope {
    /// 某个房间内的消息
    Room(RoomId),
    /// 单向：sender 发给 receiver 的私聊消息
    Direct { sender_id: UserId, receiver_id: UserId },
    /// 双向：两个用户之间的全部私聊消息
    Conversation(UserId, UserId),
}

/// 消息查询条件。结果总是按 created_at 升序；
/// 设置 `limit` 时取最近的 `limit` 条，页内仍按时间顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQuery {
    pub scope: MessageScope,
    pub status: Option<MessageStatus>,
    pub limit: Option<u32>,
}

impl MessageQuery {
    pub fn room(room_id: RoomId) -> Self {
        Self::scoped(MessageScope::Room(room_id))
    }

    pub fn direct(sender_id: UserId, receiver_id: UserId) -> Self {
        Self::scoped(MessageScope::Direct {
            sender_id,
            receiver_id,
        })
    }

    pub fn conversation(a: UserId, b: UserId) -> Self {
        Self::scoped(MessageScope::Conversation(a, b))
    }

    fn scoped(scope: MessageScope) -> Self {
        Self {
            scope,
            status: None,
            limit: None,
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn recent(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 供内存实现与测试复用的过滤逻辑
    pub fn matches(&self, message: &Message) -> bool {
        let in_scope = match self.scope {
            MessageScope::Room(room_id) => message.room_id == Some(room_id),
            MessageScope::Direct {
                sender_id,
                receiver_id,
            } => message.sender_id == sender_id && message.receiver_id == Some(receiver_id),
            MessageScope::Conversation(a, b) => {
                (message.sender_id == a && message.receiver_id == Some(b))
                    || (message.sender_id == b && message.receiver_id == Some(a))
            }
        };
        in_scope && self.status.map_or(true, |status| message.status == status)
    }
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 持久化新消息，返回存储后的记录
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError>;

    // 条件更新：仅当当前状态为 `expected` 时写入 `next`，返回是否发生了修改。
    // 同一转换被并发触发时只有一方成功，从而保证每次转换只广播一次。
    async fn update_message_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, RepositoryError>;

    async fn find_messages(&self, query: MessageQuery) -> Result<Vec<Message>, RepositoryError>;
}
