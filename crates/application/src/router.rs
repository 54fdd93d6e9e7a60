//! 会话路由
//!
//! 把连接绑定到当前会话（房间或私聊对端），并分发连接上的入站事件。

use std::sync::Arc;

use domain::{
    ConnectionId, ConversationTarget, Message, MessageContent, MessageId, MessageStatus, UserId,
};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::connection::Connection;
use crate::delivery::{DeliverySettings, DeliveryStateMachine};
use crate::error::ApplicationError;
use crate::events::{ClientEvent, SendMessagePayload, ServerEvent, TargetPayload};
use crate::rate_limiter::{MessageRateLimiter, RateLimitDecision};
use crate::repository::{MessageQuery, MessageRepository, RoomRepository};
use crate::sessions::SessionTable;

pub struct SessionRouter {
    sessions: Arc<SessionTable>,
    delivery: Arc<DeliveryStateMachine>,
    limiter: Arc<MessageRateLimiter>,
    rooms: Arc<dyn RoomRepository>,
    messages: Arc<dyn MessageRepository>,
    clock: Arc<dyn Clock>,
    settings: DeliverySettings,
}

impl SessionRouter {
    pub fn new(
        sessions: Arc<SessionTable>,
        delivery: Arc<DeliveryStateMachine>,
        limiter: Arc<MessageRateLimiter>,
        rooms: Arc<dyn RoomRepository>,
        messages: Arc<dyn MessageRepository>,
        clock: Arc<dyn Clock>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            sessions,
            delivery,
            limiter,
            rooms,
            messages,
            clock,
            settings,
        }
    }

    /// 绑定连接到新的会话目标。
    ///
    /// 旧绑定的轮询令牌在绑定表中被原子地替换并取消。私聊会先做一次
    /// delivered → seen 的推进，然后回放最近消息并启动已读轮询；
    /// 房间会确保成员关系并回放最近消息。
    pub async fn bind(
        &self,
        connection: &Connection,
        target: ConversationTarget,
    ) -> Result<(), ApplicationError> {
        let user_id = connection.user_id();

        match target {
            ConversationTarget::Room(room_id) => {
                let memberships = self.rooms.find_room_membership(user_id).await?;
                if !memberships.contains(&room_id)
                    && self.rooms.ensure_room_membership(user_id, room_id).await?
                {
                    tracing::info!(user_id = %user_id, room_id = %room_id, "加入房间成员");
                }

                if !self.sessions.bind(connection.id(), target, None) {
                    return Ok(());
                }

                let recent = self
                    .messages
                    .find_messages(MessageQuery::room(room_id).recent(self.settings.recent_limit))
                    .await?;
                connection.handle.send(ServerEvent::RecentMessages(recent));
            }
            ConversationTarget::Direct(peer) => {
                let token = CancellationToken::new();
                if !self.sessions.bind(connection.id(), target, Some(token.clone())) {
                    return Ok(());
                }
                // 轮询与绑定同生命周期，不依赖首次推进是否成功
                self.spawn_seen_poll(connection.id(), user_id, peer, token);

                self.delivery.flush_seen(user_id, peer).await?;

                let recent = self
                    .messages
                    .find_messages(
                        MessageQuery::conversation(user_id, peer).recent(self.settings.recent_limit),
                    )
                    .await?;
                connection.handle.send(ServerEvent::RecentMessages(recent));
            }
        }

        tracing::info!(user_id = %user_id, connection_id = %connection.id(), target = %target, "绑定会话");
        Ok(())
    }

    /// 解绑当前会话。未绑定时是空操作。私聊解绑后做最后一次已读推进。
    pub async fn unbind(
        &self,
        connection: &Connection,
    ) -> Result<Option<ConversationTarget>, ApplicationError> {
        let Some(previous) = self.sessions.unbind(connection.id()) else {
            return Ok(None);
        };

        if let ConversationTarget::Direct(peer) = previous {
            self.delivery.flush_seen(connection.user_id(), peer).await?;
        }

        tracing::info!(user_id = %connection.user_id(), connection_id = %connection.id(), target = %previous, "解绑会话");
        Ok(Some(previous))
    }

    pub async fn dispatch_inbound(
        &self,
        connection: &Connection,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        match event {
            ClientEvent::SendMessage(payload) => self.send_message(connection, payload).await,
            ClientEvent::JoinRoom(payload) => self.bind(connection, payload.target()?).await,
            ClientEvent::LeaveRoom(payload) => self.leave(connection, payload).await,
        }
    }

    async fn send_message(
        &self,
        connection: &Connection,
        payload: SendMessagePayload,
    ) -> Result<(), ApplicationError> {
        let sender_id = connection.user_id();
        let target = payload.target()?;
        let content = MessageContent::new(payload.content)?;

        // 限流必须在任何持久化之前
        if let RateLimitDecision::Deny { retry_after } = self
            .limiter
            .check_and_consume(sender_id, target, &connection.handle)
            .await
        {
            return Err(ApplicationError::RateLimited { retry_after });
        }

        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            sender_id,
            target,
            content,
            self.clock.now(),
        );
        let stored = self.messages.insert_message(message).await.map_err(|err| {
            tracing::error!(error = %err, user_id = %sender_id, target = %target, "消息持久化失败");
            err
        })?;

        let settled = match self.delivery.settle_new_message(stored.clone()).await {
            Ok(settled) => settled,
            Err(err) => {
                tracing::warn!(error = %err, message_id = %stored.id, "新消息状态推进失败，保持 sent");
                stored
            }
        };

        self.delivery.publish_new_message(&settled, &connection.handle);
        if settled.status != MessageStatus::Sent {
            self.delivery.publish_status(&settled, Some(&connection.handle));
        }

        tracing::debug!(message_id = %settled.id, user_id = %sender_id, target = %target, status = %settled.status, "消息已发送");
        Ok(())
    }

    /// 离开会话只影响绑定，不改变全局在线状态
    async fn leave(
        &self,
        connection: &Connection,
        payload: TargetPayload,
    ) -> Result<(), ApplicationError> {
        if payload.room_id.is_some() || payload.receiver_id.is_some() {
            let target = payload.target()?;
            if !self.sessions.is_bound_to(connection.id(), target) {
                tracing::debug!(connection_id = %connection.id(), target = %target, "离开的不是当前会话，忽略");
                return Ok(());
            }
        }
        self.unbind(connection).await.map(|_| ())
    }

    fn spawn_seen_poll(
        &self,
        connection_id: ConnectionId,
        viewer: UserId,
        peer: UserId,
        token: CancellationToken,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let delivery = Arc::clone(&self.delivery);
        let period = self.settings.poll_interval;
        let target = ConversationTarget::Direct(peer);
        let first_tick = Instant::now() + period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // 迟到的触发：连接已解绑或断开时什么也不做
                        if token.is_cancelled() || !sessions.is_bound_to(connection_id, target) {
                            break;
                        }
                        if let Err(err) = delivery.flush_seen(viewer, peer).await {
                            tracing::warn!(error = %err, user_id = %viewer, peer_id = %peer, "已读轮询失败");
                        }
                    }
                }
            }
            tracing::debug!(connection_id = %connection_id, peer_id = %peer, "已读轮询结束");
        });
    }
}
