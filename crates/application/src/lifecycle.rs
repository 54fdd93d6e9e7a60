//! 连接生命周期管理
//!
//! 每条连接的状态：未认证 → 已认证 → 已绑定(0..1) → 终止。
//! 在线状态注册表与绑定表只由这里和会话路由修改。

use std::sync::Arc;

use config::MessagingConfig;
use domain::ConnectionId;
use tokio::sync::mpsc::UnboundedSender;

use crate::clock::Clock;
use crate::connection::{Connection, ConnectionHandle};
use crate::counter_store::CounterStore;
use crate::credentials::{AuthenticatedUser, CredentialError, CredentialValidator};
use crate::delivery::{DeliverySettings, DeliveryStateMachine};
use crate::error::ApplicationError;
use crate::events::{ClientEvent, ServerEvent};
use crate::presence::PresenceRegistry;
use crate::rate_limiter::{MessageRateLimiter, RateLimitPolicy};
use crate::repository::{MessageRepository, RoomRepository, UserRepository};
use crate::router::SessionRouter;
use crate::sessions::SessionTable;

/// 引擎的外部协作者
#[derive(Clone)]
pub struct LifecycleDependencies {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub counter_store: Arc<dyn CounterStore>,
    pub validator: Arc<dyn CredentialValidator>,
    pub clock: Arc<dyn Clock>,
}

pub struct ConnectionLifecycleManager {
    validator: Arc<dyn CredentialValidator>,
    presence: Arc<PresenceRegistry>,
    sessions: Arc<SessionTable>,
    delivery: Arc<DeliveryStateMachine>,
    limiter: Arc<MessageRateLimiter>,
    router: SessionRouter,
}

impl ConnectionLifecycleManager {
    pub fn new(deps: LifecycleDependencies, messaging: &MessagingConfig) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let sessions = Arc::new(SessionTable::new());
        let settings = DeliverySettings::from(messaging);

        let delivery = Arc::new(DeliveryStateMachine::new(
            deps.messages.clone(),
            deps.rooms.clone(),
            deps.users.clone(),
            presence.clone(),
            sessions.clone(),
        ));
        let limiter = Arc::new(MessageRateLimiter::new(
            deps.counter_store.clone(),
            RateLimitPolicy::from(messaging),
        ));
        let router = SessionRouter::new(
            sessions.clone(),
            delivery.clone(),
            limiter.clone(),
            deps.rooms.clone(),
            deps.messages.clone(),
            deps.clock.clone(),
            settings,
        );

        Self {
            validator: deps.validator,
            presence,
            sessions,
            delivery,
            limiter,
            router,
        }
    }

    /// 校验令牌。失败时连接在任何在线状态变更之前被拒绝。
    pub fn authenticate(&self, token: Option<&str>) -> Result<AuthenticatedUser, ApplicationError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(CredentialError::MissingToken)?;

        self.validator.verify(token).map_err(|err| {
            tracing::warn!(error = %err, "连接认证失败");
            ApplicationError::from(err)
        })
    }

    /// 已认证连接上线：注册在线状态，然后补投其他在线用户发来的 sent 消息
    pub async fn connect(
        &self,
        user: AuthenticatedUser,
        sender: UnboundedSender<ServerEvent>,
    ) -> Connection {
        let handle = ConnectionHandle::new(ConnectionId::generate(), user.id, sender);
        self.sessions.open(handle.clone());
        self.presence.register(handle.clone(), user.username.clone());

        if let Err(err) = self.delivery.deliver_backlog(user.id).await {
            tracing::warn!(error = %err, user_id = %user.id, "上线补投失败");
        }

        tracing::info!(user_id = %user.id, username = %user.username, connection_id = %handle.id(), "连接建立");
        Connection { handle, user }
    }

    /// 处理一条入站事件。失败只影响该连接：转换为该连接上的 `error` 事件。
    pub async fn dispatch(&self, connection: &Connection, event: ClientEvent) {
        if let Err(err) = self.router.dispatch_inbound(connection, event).await {
            match &err {
                ApplicationError::RateLimited { .. } => {
                    tracing::debug!(user_id = %connection.user_id(), error = %err, "发送被限流");
                }
                _ => {
                    tracing::warn!(user_id = %connection.user_id(), connection_id = %connection.id(), error = %err, "事件处理失败");
                }
            }
            connection.handle.send(ServerEvent::error(err.client_message()));
        }
    }

    /// 连接终止：取消轮询、注销在线状态、执行断线回退。
    ///
    /// 旧连接在用户已有更新的注册时断开，不会触发 offline 广播与回退。
    pub async fn disconnect(&self, connection: Connection) {
        let user_id = connection.user_id();
        self.sessions.close(connection.id());

        if !self.presence.unregister(user_id, connection.id()) {
            tracing::info!(user_id = %user_id, connection_id = %connection.id(), "旧连接关闭");
            return;
        }

        if let Err(err) = self.delivery.regress_on_disconnect(user_id).await {
            tracing::warn!(error = %err, user_id = %user_id, "断线回退失败");
        }
        tracing::info!(user_id = %user_id, connection_id = %connection.id(), "连接断开");
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn rate_limiter(&self) -> &MessageRateLimiter {
        &self.limiter
    }
}
