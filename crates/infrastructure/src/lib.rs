//! 基础设施层实现。
//!
//! 提供 Postgres 记录存储与 Redis 计数器存储，实现应用层定义的接口。

pub mod counter_store;
pub mod migrations;
pub mod repository;

pub use counter_store::RedisCounterStore;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgChatRoomRepository, PgMessageRepository, PgStorage, PgUserRepository,
};
