#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::memory::{MemoryCounterStore, MemoryStore};
use application::{ConnectionLifecycleManager, LifecycleDependencies, SystemClock};
use config::{JwtConfig, MessagingConfig};
use domain::{ChatRoom, RoomId, User, UserId, Username};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub jwt: JwtService,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// 在临时端口上启动完整的 axum 服务，存储使用内存实现
    pub async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let jwt = JwtService::new(JwtConfig {
            secret: "integration-test-secret-with-enough-length".to_string(),
            expiration_hours: 1,
        });

        let lifecycle = ConnectionLifecycleManager::new(
            LifecycleDependencies {
                users: store.clone(),
                rooms: store.clone(),
                messages: store.clone(),
                counter_store: Arc::new(MemoryCounterStore::new()),
                validator: Arc::new(jwt.clone()),
                clock: Arc::new(SystemClock),
            },
            &MessagingConfig::default(),
        );
        let app = router(AppState::new(Arc::new(lifecycle)));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            jwt,
            shutdown: Some(shutdown_tx),
        }
    }

    /// 注册用户并签发令牌
    pub fn user(&self, name: &str) -> (UserId, String) {
        let id = UserId::from(Uuid::new_v4());
        self.store.add_user(User {
            id,
            username: Username::parse(name).expect("username"),
        });
        let token = self
            .jwt
            .generate_token(Uuid::from(id), name)
            .expect("token");
        (id, token)
    }

    pub fn room(&self, name: &str) -> RoomId {
        let id = RoomId::from(Uuid::new_v4());
        self.store.add_room(ChatRoom {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/api/v1/ws?token={}", self.addr, token),
            None => format!("ws://{}/api/v1/ws", self.addr),
        }
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        let (ws, _) = connect_async(self.ws_url(Some(token)))
            .await
            .expect("ws connect");
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一条指定名称的事件，跳过其他事件
pub async fn next_event(ws: &mut WsClient, name: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = ws
                .next()
                .await
                .expect("socket closed")
                .expect("socket error");
            if let WsMessage::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).expect("json event");
                if value["event"] == name {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}
