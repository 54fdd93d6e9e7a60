use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, UserId, Username};

/// 用户目录中的一条记录（凭据与密码哈希不在本核心范围内）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
}

/// 聊天室记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
}
