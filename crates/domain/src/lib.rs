//! 实时消息系统核心领域模型
//!
//! 包含用户、会话目标、消息及其投递状态的转换规则。

pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use user::*;
pub use value_objects::*;
