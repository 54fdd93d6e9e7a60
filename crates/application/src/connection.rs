use domain::{ConnectionId, UserId};
use tokio::sync::mpsc;

use crate::credentials::AuthenticatedUser;
use crate::events::ServerEvent;

/// 指向一条活动连接的句柄。
///
/// 写入端是无界通道，发送不会挂起；连接关闭后发送被静默丢弃，
/// 因此对已断开连接的迟到事件不会重试。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            user_id,
            sender,
        }
    }

    /// 新建连接句柄及其出站事件接收端
    pub fn channel(user_id: UserId) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(ConnectionId::generate(), user_id, sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn send(&self, event: ServerEvent) -> bool {
        if self.sender.send(event).is_err() {
            tracing::debug!(connection_id = %self.id, user_id = %self.user_id, "连接已关闭，丢弃事件");
            return false;
        }
        true
    }
}

/// 已认证的连接，生命周期内由连接生命周期管理器独占
#[derive(Debug)]
pub struct Connection {
    pub handle: ConnectionHandle,
    pub user: AuthenticatedUser,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }
}
