//! 消息投递状态机
//!
//! 负责 sent → delivered → seen 的推进，以及断线时 delivered → sent 的回退。
//! 所有状态写入都通过存储层的条件更新完成：只有真正改变了存储状态的一方
//! 才会广播 `messageStatusUpdate`，因此每次转换恰好广播一次。

use std::sync::Arc;
use std::time::Duration;

use config::MessagingConfig;
use domain::{ConversationTarget, Message, MessageStatus, RecipientState, UserId};

use crate::connection::ConnectionHandle;
use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::presence::PresenceRegistry;
use crate::repository::{MessageQuery, MessageRepository, RoomRepository, UserRepository};
use crate::sessions::SessionTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// 绑定私聊期间已读轮询的间隔
    pub poll_interval: Duration,
    /// 绑定时回放的最近消息条数
    pub recent_limit: u32,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            recent_limit: 50,
        }
    }
}

impl From<&MessagingConfig> for DeliverySettings {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.seen_poll_interval_secs),
            recent_limit: config.recent_messages_limit,
        }
    }
}

pub struct DeliveryStateMachine {
    messages: Arc<dyn MessageRepository>,
    rooms: Arc<dyn RoomRepository>,
    users: Arc<dyn UserRepository>,
    presence: Arc<PresenceRegistry>,
    sessions: Arc<SessionTable>,
}

impl DeliveryStateMachine {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        rooms: Arc<dyn RoomRepository>,
        users: Arc<dyn UserRepository>,
        presence: Arc<PresenceRegistry>,
        sessions: Arc<SessionTable>,
    ) -> Self {
        Self {
            messages,
            rooms,
            users,
            presence,
            sessions,
        }
    }

    /// 发送时刻接收方的可达情况。
    ///
    /// 房间：除发送者外有任何连接绑定在该房间即视为已送达，房间消息不会进入 seen。
    /// 私聊：接收方在线即送达；其当前绑定恰好是发送者时直接 seen。
    pub fn recipient_state(&self, sender_id: UserId, target: ConversationTarget) -> RecipientState {
        match target {
            ConversationTarget::Room(room_id) => {
                if self.sessions.room_audience(room_id, Some(sender_id)).is_empty() {
                    RecipientState::Absent
                } else {
                    RecipientState::BoundElsewhere
                }
            }
            ConversationTarget::Direct(receiver_id) => match self.presence.handle_of(receiver_id) {
                None => RecipientState::Absent,
                Some(handle) => {
                    if self
                        .sessions
                        .is_bound_to(handle.id(), ConversationTarget::Direct(sender_id))
                    {
                        RecipientState::ViewingSender
                    } else {
                        RecipientState::BoundElsewhere
                    }
                }
            },
        }
    }

    /// 对刚持久化的消息应用创建时的状态推进，返回推进后的记录
    pub async fn settle_new_message(&self, mut message: Message) -> Result<Message, ApplicationError> {
        let target = message.target()?;
        let next = MessageStatus::on_creation(self.recipient_state(message.sender_id, target));
        if next == message.status {
            return Ok(message);
        }

        if self
            .messages
            .update_message_status(message.id, message.status, next)
            .await?
        {
            message.advance(next)?;
            tracing::debug!(message_id = %message.id, status = %next, "新消息状态推进");
        }
        Ok(message)
    }

    /// 把 `viewer` 收到的、来自 `peer` 的 delivered 私聊消息推进为 seen
    pub async fn flush_seen(&self, viewer: UserId, peer: UserId) -> Result<usize, ApplicationError> {
        let pending = self
            .messages
            .find_messages(MessageQuery::direct(peer, viewer).with_status(MessageStatus::Delivered))
            .await?;
        self.advance_all(pending, MessageStatus::Delivered, MessageStatus::Seen)
            .await
    }

    /// 用户上线：其他在线用户发给他的 sent 私聊消息推进为 delivered
    pub async fn deliver_backlog(&self, user_id: UserId) -> Result<usize, ApplicationError> {
        let mut advanced = 0;
        for sender in self.users.find_users_except(user_id).await? {
            if !self.presence.is_online(sender.id) {
                continue;
            }
            let pending = self
                .messages
                .find_messages(
                    MessageQuery::direct(sender.id, user_id).with_status(MessageStatus::Sent),
                )
                .await?;
            advanced += self
                .advance_all(pending, MessageStatus::Sent, MessageStatus::Delivered)
                .await?;
        }

        if advanced > 0 {
            tracing::info!(user_id = %user_id, advanced, "上线补投消息");
        }
        Ok(advanced)
    }

    /// 断线回退：用户所在的每个房间内 delivered 的消息回退为 sent。
    /// seen 不回退。
    pub async fn regress_on_disconnect(&self, user_id: UserId) -> Result<usize, ApplicationError> {
        let mut regressed = 0;
        for room in self.rooms.find_rooms_for_user(user_id).await? {
            let delivered = self
                .messages
                .find_messages(MessageQuery::room(room.id).with_status(MessageStatus::Delivered))
                .await?;
            for mut message in delivered {
                if !self
                    .messages
                    .update_message_status(message.id, MessageStatus::Delivered, MessageStatus::Sent)
                    .await?
                {
                    continue;
                }
                message.regress()?;
                self.publish_status(&message, None);
                regressed += 1;
            }
        }

        if regressed > 0 {
            tracing::info!(user_id = %user_id, regressed, "断线回退消息状态");
        }
        Ok(regressed)
    }

    /// 向消息的发送者与接收方（私聊对端或房间内绑定的连接）推送新消息
    pub fn publish_new_message(&self, message: &Message, origin: &ConnectionHandle) {
        let event = ServerEvent::NewMessage(message.clone());
        for handle in self.audience(message, Some(origin)) {
            handle.send(event.clone());
        }
    }

    pub fn publish_status(&self, message: &Message, origin: Option<&ConnectionHandle>) {
        let event = ServerEvent::status_update(message);
        for handle in self.audience(message, origin) {
            handle.send(event.clone());
        }
    }

    /// 发送者使用发起请求的连接（若有），否则使用其在线注册的连接
    fn audience(&self, message: &Message, origin: Option<&ConnectionHandle>) -> Vec<ConnectionHandle> {
        let mut audience: Vec<ConnectionHandle> = Vec::new();
        let sender = origin
            .cloned()
            .or_else(|| self.presence.handle_of(message.sender_id));
        audience.extend(sender);

        match (message.room_id, message.receiver_id) {
            (Some(room_id), _) => {
                audience.extend(self.sessions.room_audience(room_id, Some(message.sender_id)));
            }
            (None, Some(receiver_id)) => {
                audience.extend(self.presence.handle_of(receiver_id));
            }
            (None, None) => {}
        }

        let mut seen = std::collections::HashSet::new();
        audience.retain(|handle| seen.insert(handle.id()));
        audience
    }

    async fn advance_all(
        &self,
        pending: Vec<Message>,
        from: MessageStatus,
        to: MessageStatus,
    ) -> Result<usize, ApplicationError> {
        let mut advanced = 0;
        for mut message in pending {
            if !self
                .messages
                .update_message_status(message.id, from, to)
                .await?
            {
                // 已被并发的另一次推进处理
                continue;
            }
            message.advance(to)?;
            self.publish_status(&message, None);
            advanced += 1;
        }
        Ok(advanced)
    }
}
