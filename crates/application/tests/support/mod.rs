#![allow(dead_code)]

use std::sync::Arc;

use application::memory::{MemoryCounterStore, MemoryStore};
use application::{
    AuthenticatedUser, ClientEvent, Connection, ConnectionLifecycleManager, CredentialError,
    CredentialValidator, LifecycleDependencies, ServerEvent, SystemClock,
};
use application::events::{SendMessagePayload, TargetPayload};
use config::MessagingConfig;
use domain::{ChatRoom, ConversationTarget, Message, MessageStatus, RoomId, User, UserId, Username};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

// 测试直接调用 connect，令牌校验在单元测试中覆盖
pub struct RejectAll;

impl CredentialValidator for RejectAll {
    fn verify(&self, _token: &str) -> Result<AuthenticatedUser, CredentialError> {
        Err(CredentialError::InvalidToken("not used in engine tests".to_string()))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub manager: ConnectionLifecycleManager,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let manager = ConnectionLifecycleManager::new(
            LifecycleDependencies {
                users: store.clone(),
                rooms: store.clone(),
                messages: store.clone(),
                counter_store: Arc::new(MemoryCounterStore::new()),
                validator: Arc::new(RejectAll),
                clock: Arc::new(SystemClock),
            },
            &MessagingConfig::default(),
        );
        Self { store, manager }
    }

    pub fn user(&self, name: &str) -> AuthenticatedUser {
        let user = AuthenticatedUser {
            id: UserId::from(Uuid::new_v4()),
            username: Username::parse(name).expect("valid username"),
        };
        self.store.add_user(User {
            id: user.id,
            username: user.username.clone(),
        });
        user
    }

    pub fn room(&self, name: &str) -> RoomId {
        let id = RoomId::from(Uuid::new_v4());
        self.store.add_room(ChatRoom {
            id,
            name: name.to_string(),
        });
        id
    }

    pub async fn connect(&self, user: &AuthenticatedUser) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.manager.connect(user.clone(), tx).await;
        Client { connection, rx }
    }

    pub async fn send(&self, client: &Client, target: ConversationTarget, content: &str) {
        let (room_id, receiver_id) = split(target);
        self.manager
            .dispatch(
                &client.connection,
                ClientEvent::SendMessage(SendMessagePayload {
                    content: content.to_string(),
                    room_id,
                    receiver_id,
                }),
            )
            .await;
    }

    pub async fn join(&self, client: &Client, target: ConversationTarget) {
        let (room_id, receiver_id) = split(target);
        self.manager
            .dispatch(
                &client.connection,
                ClientEvent::JoinRoom(TargetPayload {
                    room_id,
                    receiver_id,
                }),
            )
            .await;
    }

    pub async fn leave(&self, client: &Client) {
        self.manager
            .dispatch(&client.connection, ClientEvent::LeaveRoom(TargetPayload::default()))
            .await;
    }

    pub async fn disconnect(&self, client: Client) {
        self.manager.disconnect(client.connection).await;
    }

    pub fn only_message(&self) -> Message {
        let messages = self.store.messages();
        assert_eq!(messages.len(), 1, "expected exactly one stored message");
        messages[0].clone()
    }
}

fn split(target: ConversationTarget) -> (Option<RoomId>, Option<UserId>) {
    match target {
        ConversationTarget::Room(room_id) => (Some(room_id), None),
        ConversationTarget::Direct(receiver_id) => (None, Some(receiver_id)),
    }
}

pub struct Client {
    pub connection: Connection,
    pub rx: UnboundedReceiver<ServerEvent>,
}

impl Client {
    pub fn user_id(&self) -> UserId {
        self.connection.user_id()
    }

    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn status_updates(&mut self) -> Vec<MessageStatus> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::MessageStatusUpdate(update) => Some(update.status),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::Error(payload) => Some(payload.message),
                _ => None,
            })
            .collect()
    }
}

/// 让已就绪的后台任务（轮询、解锁）跑完一轮
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
