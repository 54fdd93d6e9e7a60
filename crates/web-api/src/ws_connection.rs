use std::ops::ControlFlow;

use application::{
    AuthenticatedUser, ClientEvent, Connection, ConnectionLifecycleManager, ServerEvent,
};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// WebSocket 连接
///
/// 封装单个已认证连接的收发逻辑：
/// - 出站事件由独立的发送任务写入 socket
/// - 入站事件在本任务中按到达顺序依次处理
/// - 连接结束时交给生命周期管理器清理
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user: AuthenticatedUser,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, user: AuthenticatedUser) -> Self {
        Self {
            socket,
            state,
            user,
        }
    }

    /// 运行连接主循环，直到客户端断开或发送任务结束
    pub async fn run(self) {
        let Self {
            socket,
            state,
            user,
        } = self;
        let lifecycle = state.lifecycle;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let connection = lifecycle.connect(user, event_tx).await;

        let (mut sender, mut incoming) = socket.split();

        // 心跳回应与业务事件都经由发送任务写出
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(event) = event_rx.recv() => match serde_json::to_string(&event) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize websocket payload");
                            continue;
                        }
                    },
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data),
                    },
                    else => break,
                };
                if sender.send(frame).await.is_err() {
                    tracing::debug!("WebSocket 写入失败");
                    break;
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        loop {
            tokio::select! {
                message = incoming.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "WebSocket 读取失败");
                            break;
                        }
                        None => break,
                    };
                    if Self::handle_incoming(&lifecycle, &connection, message, &cmd_tx)
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
                _ = &mut send_task => break,
            }
        }

        let user_id = connection.user_id();
        lifecycle.disconnect(connection).await;
        send_task.abort();

        tracing::info!(user_id = %user_id, "WebSocket连接已断开，在线状态已清理");
    }

    /// 处理来自客户端的一帧
    async fn handle_incoming(
        lifecycle: &ConnectionLifecycleManager,
        connection: &Connection,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> ControlFlow<()> {
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => lifecycle.dispatch(connection, event).await,
                Err(err) => {
                    tracing::debug!(error = %err, user_id = %connection.user_id(), "无法解析的客户端事件");
                    connection
                        .handle
                        .send(ServerEvent::error(format!("invalid event: {}", err)));
                }
            },
            WsMessage::Close(_) => {
                tracing::info!(user_id = %connection.user_id(), "WebSocket收到关闭消息");
                return ControlFlow::Break(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::debug!("收到pong消息");
            }
            WsMessage::Binary(_) => {
                tracing::debug!("忽略二进制消息");
            }
        }
        ControlFlow::Continue(())
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}
