use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::sync::Arc;

pub type DbPool = Arc<SqlitePool>;

pub async fn init_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
    // File-backed databases live under ./data unless DATABASE_URL points elsewhere
    if database_url.starts_with("sqlite:./data/") {
        std::fs::create_dir_all("./data").ok();
    }

    tracing::info!("Connecting to database: {}", database_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    create_schema(&pool).await?;

    Ok(Arc::new(pool))
}

/// Creates the `users` and `messages` tables if they do not exist yet.
///
/// Messages reference users by `username`, never by a surrogate key.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            password TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT NOT NULL,
            join_at TEXT NOT NULL,
            last_login_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_username TEXT NOT NULL,
            to_username TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            read_at TEXT,
            FOREIGN KEY (from_username) REFERENCES users(username),
            FOREIGN KEY (to_username) REFERENCES users(username)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_from_username ON messages(from_username)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_to_username ON messages(to_username)")
        .execute(pool)
        .await?;

    Ok(())
}

/// In-memory database for tests. A single connection that never expires,
/// since every new `:memory:` connection would open an empty database.
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None::<std::time::Duration>)
        .max_lifetime(None::<std::time::Duration>)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    create_schema(&pool).await.expect("create schema");
    Arc::new(pool)
}

/// Inserts a message row directly; the core itself has no send operation.
#[cfg(test)]
pub async fn insert_test_message(pool: &SqlitePool, from: &str, to: &str, body: &str) -> i64 {
    sqlx::query("INSERT INTO messages (from_username, to_username, body, sent_at) VALUES (?, ?, ?, ?)")
        .bind(from)
        .bind(to)
        .bind(body)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await
        .expect("insert message")
        .last_insert_rowid()
}
