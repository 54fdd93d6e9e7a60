//! 在线状态注册表
//!
//! 用户 → 连接句柄的权威映射，同时充当按用户查找连接的 O(1) 索引。
//! 每个用户只保留最后注册的连接。

use std::collections::HashMap;

use domain::{ConnectionId, UserId, Username};
use parking_lot::RwLock;

use crate::connection::ConnectionHandle;
use crate::events::{OnlineUser, PresenceStatus, ServerEvent, UserStatusChange};

struct PresenceEntry {
    username: Username,
    handle: ConnectionHandle,
}

#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接：写入/覆盖条目，向其他连接广播 online，
    /// 然后仅向新连接发送完整快照。
    pub fn register(&self, handle: ConnectionHandle, username: Username) {
        let user_id = handle.user_id();
        let (others, snapshot) = {
            let mut entries = self.entries.write();
            entries.insert(
                user_id,
                PresenceEntry {
                    username,
                    handle: handle.clone(),
                },
            );
            let others = Self::handles_except(&entries, user_id);
            (others, Self::snapshot_of(&entries))
        };

        let online = ServerEvent::UserStatus(UserStatusChange {
            user_id,
            status: PresenceStatus::Online,
        });
        for other in &others {
            other.send(online.clone());
        }
        handle.send(ServerEvent::OnlineUsers(snapshot));

        tracing::info!(user_id = %user_id, connection_id = %handle.id(), online = others.len() + 1, "用户上线");
    }

    /// 注销连接。仅当该连接仍是用户当前注册的连接时才移除条目，
    /// 然后广播 offline 与更新后的快照。返回是否发生了移除。
    pub fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let (remaining, snapshot) = {
            let mut entries = self.entries.write();
            let is_current = entries
                .get(&user_id)
                .map(|entry| entry.handle.id() == connection_id);
            match is_current {
                Some(true) => {
                    entries.remove(&user_id);
                }
                Some(false) => {
                    tracing::debug!(user_id = %user_id, connection_id = %connection_id, "旧连接断开，保留较新的注册");
                    return false;
                }
                None => return false,
            }
            let remaining: Vec<ConnectionHandle> =
                entries.values().map(|entry| entry.handle.clone()).collect();
            (remaining, Self::snapshot_of(&entries))
        };

        let offline = ServerEvent::UserStatus(UserStatusChange {
            user_id,
            status: PresenceStatus::Offline,
        });
        for handle in &remaining {
            handle.send(offline.clone());
        }
        for handle in &remaining {
            handle.send(ServerEvent::OnlineUsers(snapshot.clone()));
        }

        tracing::info!(user_id = %user_id, online = remaining.len(), "用户下线");
        true
    }

    /// 按展示名（其次按 id）排序的在线用户列表
    pub fn snapshot(&self) -> Vec<OnlineUser> {
        Self::snapshot_of(&self.entries.read())
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.entries.read().contains_key(&user_id)
    }

    pub fn handle_of(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .get(&user_id)
            .map(|entry| entry.handle.clone())
    }

    pub fn online_count(&self) -> usize {
        self.entries.read().len()
    }

    fn handles_except(
        entries: &HashMap<UserId, PresenceEntry>,
        user_id: UserId,
    ) -> Vec<ConnectionHandle> {
        entries
            .iter()
            .filter(|(id, _)| **id != user_id)
            .map(|(_, entry)| entry.handle.clone())
            .collect()
    }

    fn snapshot_of(entries: &HashMap<UserId, PresenceEntry>) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = entries
            .iter()
            .map(|(id, entry)| OnlineUser {
                id: *id,
                username: entry.username.clone(),
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    fn connect(
        registry: &PresenceRegistry,
        name: &str,
    ) -> (ConnectionHandle, UnboundedReceiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::channel(UserId::from(Uuid::new_v4()));
        registry.register(handle.clone(), Username::parse(name).unwrap());
        (handle, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn new_connection_gets_snapshot_but_no_self_online_event() {
        let registry = PresenceRegistry::new();
        let (alice, mut alice_rx) = connect(&registry, "alice");

        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::OnlineUsers(users) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].id, alice.user_id());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn others_receive_online_broadcast() {
        let registry = PresenceRegistry::new();
        let (_alice, mut alice_rx) = connect(&registry, "alice");
        drain(&mut alice_rx);

        let (bob, mut bob_rx) = connect(&registry, "bob");

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::UserStatus(UserStatusChange {
                user_id: bob.user_id(),
                status: PresenceStatus::Online,
            })]
        );
        let bob_events = drain(&mut bob_rx);
        assert!(matches!(bob_events.as_slice(), [ServerEvent::OnlineUsers(users)] if users.len() == 2));
    }

    #[test]
    fn unregister_broadcasts_offline_then_snapshot() {
        let registry = PresenceRegistry::new();
        let (_alice, mut alice_rx) = connect(&registry, "alice");
        let (bob, _bob_rx) = connect(&registry, "bob");
        drain(&mut alice_rx);

        assert!(registry.unregister(bob.user_id(), bob.id()));
        assert!(!registry.is_online(bob.user_id()));

        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ServerEvent::UserStatus(UserStatusChange {
                user_id: bob.user_id(),
                status: PresenceStatus::Offline,
            })
        );
        assert!(matches!(&events[1], ServerEvent::OnlineUsers(users) if users.len() == 1));
    }

    #[test]
    fn stale_connection_does_not_remove_newer_registration() {
        let registry = PresenceRegistry::new();
        let user_id = UserId::from(Uuid::new_v4());
        let (first, _first_rx) = ConnectionHandle::channel(user_id);
        let (second, _second_rx) = ConnectionHandle::channel(user_id);

        registry.register(first.clone(), Username::parse("carol").unwrap());
        registry.register(second.clone(), Username::parse("carol").unwrap());

        assert!(!registry.unregister(user_id, first.id()));
        assert!(registry.is_online(user_id));
        assert_eq!(registry.handle_of(user_id).unwrap().id(), second.id());

        assert!(registry.unregister(user_id, second.id()));
        assert!(!registry.unregister(user_id, second.id()));
    }

    #[test]
    fn snapshot_is_sorted_by_display_name() {
        let registry = PresenceRegistry::new();
        connect(&registry, "zoe");
        connect(&registry, "adam");
        connect(&registry, "mia");

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|user| user.username.to_string())
            .collect();
        assert_eq!(names, vec!["adam", "mia", "zoe"]);
    }
}
