use std::sync::Arc;

use application::{MessageQuery, MessageRepository, MessageScope, RoomRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatRoom, Message, MessageContent, MessageId, MessageStatus, RepositoryError, RoomId, User,
    UserId, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        other => RepositoryError::storage(other.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(User {
            id: UserId::from(value.id),
            username,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: String,
}

impl From<RoomRecord> for ChatRoom {
    fn from(value: RoomRecord) -> Self {
        ChatRoom {
            id: RoomId::from(value.id),
            name: value.name,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    room_id: Option<Uuid>,
    content: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let status = value
            .status
            .parse::<MessageStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;
        if value.room_id.is_some() == value.receiver_id.is_some() {
            return Err(invalid_data(format!(
                "message {} must have exactly one of room_id or receiver_id",
                value.id
            )));
        }

        Ok(Message {
            id: MessageId::from(value.id),
            sender_id: UserId::from(value.sender_id),
            receiver_id: value.receiver_id.map(UserId::from),
            room_id: value.room_id.map(RoomId::from),
            content,
            status,
            created_at: value.created_at,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "SELECT id, sender_id, receiver_id, room_id, content, status, created_at FROM messages WHERE ";

/// 按查询条件拼装 SQL。设置 limit 时倒序取最近 N 条，由调用方翻转回时间顺序。
fn build_message_query(query: &MessageQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(MESSAGE_COLUMNS);

    match query.scope {
        MessageScope::Room(room_id) => {
            builder.push("room_id = ").push_bind(Uuid::from(room_id));
        }
        MessageScope::Direct {
            sender_id,
            receiver_id,
        } => {
            builder
                .push("sender_id = ")
                .push_bind(Uuid::from(sender_id))
                .push(" AND receiver_id = ")
                .push_bind(Uuid::from(receiver_id));
        }
        MessageScope::Conversation(a, b) => {
            builder
                .push("((sender_id = ")
                .push_bind(Uuid::from(a))
                .push(" AND receiver_id = ")
                .push_bind(Uuid::from(b))
                .push(") OR (sender_id = ")
                .push_bind(Uuid::from(b))
                .push(" AND receiver_id = ")
                .push_bind(Uuid::from(a))
                .push("))");
        }
    }

    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }

    match query.limit {
        Some(limit) => {
            builder
                .push(" ORDER BY created_at DESC, id DESC LIMIT ")
                .push_bind(i64::from(limit));
        }
        None => {
            builder.push(" ORDER BY created_at ASC, id ASC");
        }
    }
    builder
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user: &User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username)
            VALUES ($1, $2)
            RETURNING id, username
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_users_except(&self, id: UserId) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username FROM users WHERE id <> $1 ORDER BY username ASC"#,
        )
        .bind(Uuid::from(id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, room: &ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            INSERT INTO chat_rooms (id, name)
            VALUES ($1, $2)
            RETURNING id, name
            "#,
        )
        .bind(Uuid::from(room.id))
        .bind(&room.name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ChatRoom::from(record))
    }
}

#[async_trait]
impl RoomRepository for PgChatRoomRepository {
    async fn find_rooms_for_user(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.name
            FROM chat_rooms r
            JOIN room_members m ON m.room_id = r.id
            WHERE m.user_id = $1
            ORDER BY r.name ASC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(ChatRoom::from).collect())
    }

    async fn find_room_membership(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar(r#"SELECT room_id FROM room_members WHERE user_id = $1"#)
                .bind(Uuid::from(user_id))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(RoomId::from).collect())
    }

    async fn ensure_room_membership(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            // 房间不存在
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
            other => map_sqlx_err(other),
        })?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert_message(&self, message: Message) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, room_id, content, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, sender_id, receiver_id, room_id, content, status, created_at
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.receiver_id.map(Uuid::from))
        .bind(message.room_id.map(Uuid::from))
        .bind(message.content.as_str())
        .bind(message.status.as_str())
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query(r#"UPDATE messages SET status = $1 WHERE id = $2 AND status = $3"#)
                .bind(next.as_str())
                .bind(Uuid::from(id))
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)"#)
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn find_messages(&self, query: MessageQuery) -> Result<Vec<Message>, RepositoryError> {
        let mut builder = build_message_query(&query);
        let records = builder
            .build_query_as::<MessageRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut items: Vec<Message> = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<_, _>>()?;
        if query.limit.is_some() {
            items.reverse();
        }
        Ok(items)
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub room_repository: Arc<PgChatRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            room_repository: Arc::new(PgChatRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
