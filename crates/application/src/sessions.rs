//! 连接 → 会话绑定表
//!
//! 记录每条连接当前查看的会话目标，以及私聊已读轮询的取消令牌。
//! 重新绑定、解绑与关闭都会在持锁期间原子地交换令牌并取消旧令牌。

use std::collections::HashMap;

use domain::{ConnectionId, ConversationTarget, RoomId, UserId};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionHandle;

struct SessionState {
    handle: ConnectionHandle,
    target: Option<ConversationTarget>,
    poll: Option<CancellationToken>,
}

impl SessionState {
    fn release_poll(&mut self) {
        if let Some(token) = self.poll.take() {
            token.cancel();
        }
    }
}

#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<ConnectionId, SessionState>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, handle: ConnectionHandle) {
        self.sessions.lock().insert(
            handle.id(),
            SessionState {
                handle,
                target: None,
                poll: None,
            },
        );
    }

    /// 移除连接并取消其轮询，返回关闭前的绑定
    pub fn close(&self, connection_id: ConnectionId) -> Option<ConversationTarget> {
        let mut state = self.sessions.lock().remove(&connection_id)?;
        state.release_poll();
        state.target
    }

    /// 绑定到新目标，先释放旧的轮询令牌。连接已关闭时返回 false。
    pub fn bind(
        &self,
        connection_id: ConnectionId,
        target: ConversationTarget,
        poll: Option<CancellationToken>,
    ) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(state) = sessions.get_mut(&connection_id) else {
            return false;
        };
        state.release_poll();
        state.target = Some(target);
        state.poll = poll;
        true
    }

    /// 解绑并取消轮询。未绑定时是空操作，返回 None。
    pub fn unbind(&self, connection_id: ConnectionId) -> Option<ConversationTarget> {
        let mut sessions = self.sessions.lock();
        let state = sessions.get_mut(&connection_id)?;
        state.release_poll();
        state.target.take()
    }

    pub fn target_of(&self, connection_id: ConnectionId) -> Option<ConversationTarget> {
        self.sessions
            .lock()
            .get(&connection_id)
            .and_then(|state| state.target)
    }

    pub fn is_bound_to(&self, connection_id: ConnectionId, target: ConversationTarget) -> bool {
        self.target_of(connection_id) == Some(target)
    }

    /// 当前绑定到房间的连接（排除指定用户的连接）
    pub fn room_audience(&self, room_id: RoomId, except: Option<UserId>) -> Vec<ConnectionHandle> {
        self.sessions
            .lock()
            .values()
            .filter(|state| state.target == Some(ConversationTarget::Room(room_id)))
            .filter(|state| except != Some(state.handle.user_id()))
            .map(|state| state.handle.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
