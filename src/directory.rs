use crate::db::DbPool;
use crate::error::Result;
use crate::models::{ReceivedMessage, SentMessage, UserDetail, UserSummary};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

const MESSAGES_FROM_SQL: &str = r#"
    SELECT
        m.id,
        u.username,
        u.first_name,
        u.last_name,
        u.phone,
        m.body,
        m.sent_at,
        m.read_at
    FROM messages m
    JOIN users u ON m.to_username = u.username
    WHERE m.from_username = ?
    ORDER BY m.id
"#;

const MESSAGES_TO_SQL: &str = r#"
    SELECT
        m.id,
        u.username,
        u.first_name,
        u.last_name,
        u.phone,
        m.body,
        m.sent_at,
        m.read_at
    FROM messages m
    JOIN users u ON m.from_username = u.username
    WHERE m.to_username = ?
    ORDER BY m.id
"#;

/// Flat result of a message/user join. `username` and friends describe the
/// counterpart, whichever side of the message it is on.
#[derive(Debug, FromRow)]
struct MessageJoinRow {
    id: i64,
    username: String,
    first_name: String,
    last_name: String,
    phone: String,
    body: String,
    sent_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

impl MessageJoinRow {
    fn counterpart(&self) -> UserSummary {
        UserSummary {
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
        }
    }

    fn into_sent(self) -> SentMessage {
        SentMessage {
            to_user: self.counterpart(),
            id: self.id,
            body: self.body,
            sent_at: self.sent_at,
            read_at: self.read_at,
        }
    }

    fn into_received(self) -> ReceivedMessage {
        ReceivedMessage {
            from_user: self.counterpart(),
            id: self.id,
            body: self.body,
            sent_at: self.sent_at,
            read_at: self.read_at,
        }
    }
}

/// Read side of the user/message relationship.
#[derive(Clone)]
pub struct Directory {
    pool: DbPool,
}

impl Directory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_all_users(&self) -> Result<Vec<UserSummary>> {
        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT username, first_name, last_name, phone FROM users",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(users)
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<UserDetail>> {
        let user = sqlx::query_as::<_, UserDetail>(
            r#"
            SELECT username, first_name, last_name, phone, join_at, last_login_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(user)
    }

    /// Messages sent by `username`, each with its receiver under `to_user`.
    /// An unknown username yields an empty list.
    pub async fn messages_from(&self, username: &str) -> Result<Vec<SentMessage>> {
        let rows = self.fetch_joined(MESSAGES_FROM_SQL, username).await?;
        Ok(rows.into_iter().map(MessageJoinRow::into_sent).collect())
    }

    /// Messages received by `username`, each with its sender under `from_user`.
    pub async fn messages_to(&self, username: &str) -> Result<Vec<ReceivedMessage>> {
        let rows = self.fetch_joined(MESSAGES_TO_SQL, username).await?;
        Ok(rows.into_iter().map(MessageJoinRow::into_received).collect())
    }

    async fn fetch_joined(&self, sql: &'static str, username: &str) -> Result<Vec<MessageJoinRow>> {
        let rows = sqlx::query_as::<_, MessageJoinRow>(sql)
            .bind(username)
            .fetch_all(self.pool.as_ref())
            .await?;
        tracing::debug!(username, count = rows.len(), "fetched joined messages");
        Ok(rows)
    }
}
