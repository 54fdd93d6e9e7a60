//! Web API 层。
//!
//! 提供 Axum 路由：健康检查与 WebSocket 连接入口，连接上的事件委托给应用层的
//! 连接生命周期管理器处理。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
