//! 应用层实现。
//!
//! 在线状态与投递状态协调引擎：跟踪哪些用户在线、把消息路由到正确的
//! 活动连接、推进消息的 sent → delivered → seen 状态，并对发送者限流。
//! 记录存储、计数器存储与凭据校验通过 trait 抽象，由基础设施层实现。

pub mod clock;
pub mod connection;
pub mod counter_store;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod presence;
pub mod rate_limiter;
pub mod repository;
pub mod router;
pub mod sessions;

pub use clock::{Clock, SystemClock};
pub use connection::{Connection, ConnectionHandle};
pub use counter_store::{CounterStore, CounterStoreError};
pub use credentials::{AuthenticatedUser, CredentialError, CredentialValidator};
pub use delivery::{DeliverySettings, DeliveryStateMachine};
pub use error::ApplicationError;
pub use events::{ClientEvent, OnlineUser, PresenceStatus, ServerEvent};
pub use lifecycle::{ConnectionLifecycleManager, LifecycleDependencies};
pub use presence::PresenceRegistry;
pub use rate_limiter::{MessageRateLimiter, RateLimitDecision, RateLimitPolicy};
pub use repository::{MessageQuery, MessageRepository, MessageScope, RoomRepository, UserRepository};
pub use router::SessionRouter;
pub use sessions::SessionTable;
