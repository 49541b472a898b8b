use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row returned by registration. `password` holds the bcrypt hash and is
/// never serialized.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct RegisteredUser {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// Display identity of a user, as listed and as embedded in messages.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct UserSummary {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct UserDetail {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub join_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A message the user sent, with the receiver embedded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SentMessage {
    pub id: i64,
    pub to_user: UserSummary,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// A message the user received, with the sender embedded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReceivedMessage {
    pub id: i64,
    pub from_user: UserSummary,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: UserDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SentMessagesResponse {
    pub messages: Vec<SentMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceivedMessagesResponse {
    pub messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
