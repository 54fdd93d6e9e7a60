//! 内存实现的记录存储与计数器存储。
//!
//! 供测试与本地开发使用；生产环境使用基础设施层的 Postgres / Redis 实现。

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::{ChatRoom, Message, MessageId, MessageStatus, RepositoryError, RoomId, User, UserId};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::counter_store::{CounterStore, CounterStoreError};
use crate::repository::{MessageQuery, MessageRepository, RoomRepository, UserRepository};

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, ChatRoom>,
    memberships: BTreeSet<(UserId, RoomId)>,
    messages: Vec<Message>,
}

/// 内存记录存储。可以切换为"不可用"以模拟存储故障。
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.state.write().users.insert(user.id, user);
    }

    pub fn add_room(&self, room: ChatRoom) {
        self.state.write().rooms.insert(room.id, room);
    }

    pub fn add_member(&self, user_id: UserId, room_id: RoomId) {
        self.state.write().memberships.insert((user_id, room_id));
    }

    pub fn is_member(&self, user_id: UserId, room_id: RoomId) -> bool {
        self.state.read().memberships.contains(&(user_id, room_id))
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.state
            .read()
            .messages
            .iter()
            .find(|message| message.id == id)
            .cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    fn ensure_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_users_except(&self, id: UserId) -> Result<Vec<User>, RepositoryError> {
        self.ensure_available()?;
        let mut users: Vec<User> = self
            .state
            .read()
            .users
            .values()
            .filter(|user| user.id != id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn find_rooms_for_user(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RepositoryError> {
        self.ensure_available()?;
        let state = self.state.read();
        Ok(state
            .memberships
            .iter()
            .filter(|(member, _)| *member == user_id)
            .filter_map(|(_, room_id)| state.rooms.get(room_id).cloned())
            .collect())
    }

    async fn find_room_membership(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError> {
        self.ensure_available()?;
        Ok(self
            .state
            .read()
            .memberships
            .iter()
            .filter(|(member, _)| *member == user_id)
            .map(|(_, room_id)| *room_id)
            .collect())
    }

    async fn ensure_room_membership(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<bool, RepositoryError> {
        self.ensure_available()?;
        let mut state = self.state.write();
        if !state.rooms.contains_key(&room_id) {
            return Err(RepositoryError::NotFound);
        }
        Ok(state.memberships.insert((user_id, room_id)))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError> {
        self.ensure_available()?;
        let mut state = self.state.write();
        if state.messages.iter().any(|existing| existing.id == message.id) {
            return Err(RepositoryError::Conflict);
        }
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, RepositoryError> {
        self.ensure_available()?;
        let mut state = self.state.write();
        let message = state
            .messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or(RepositoryError::NotFound)?;
        if message.status != expected {
            return Ok(false);
        }
        message.status = next;
        Ok(true)
    }

    async fn find_messages(&self, query: MessageQuery) -> Result<Vec<Message>, RepositoryError> {
        self.ensure_available()?;
        let mut found: Vec<Message> = self
            .state
            .read()
            .messages
            .iter()
            .filter(|message| query.matches(message))
            .cloned()
            .collect();
        // 稳定排序：时间戳相同的消息保持插入顺序
        found.sort_by_key(|message| message.created_at);
        if let Some(limit) = query.limit {
            let skip = found.len().saturating_sub(limit as usize);
            found.drain(..skip);
        }
        Ok(found)
    }
}

/// 内存计数器存储，过期时间使用 tokio 时钟以便在暂停时间的测试中推进
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (i64, Instant)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, CounterStoreError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(*value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), CounterStoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}
