use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("username '{0}' is already taken")]
    Conflict(String),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a number, got '{value}'")]
    NotANumber { name: &'static str, value: String },

    #[error("BCRYPT_WORK_FACTOR must be between {min} and {max}, got {value}")]
    WorkFactorOutOfRange { value: u32, min: u32, max: u32 },
}
