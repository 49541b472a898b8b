use crate::config::AuthConfig;
use crate::db::DbPool;
use crate::error::{Error, Result};
use crate::handlers::{api_error, ApiError};
use crate::models::RegisteredUser;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token. Only the username; no expiry is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
}

/// Owns password hashing, credential checks, login bookkeeping and token
/// issuance.
#[derive(Clone)]
pub struct Credentials {
    pool: DbPool,
    config: AuthConfig,
}

impl Credentials {
    pub fn new(pool: DbPool, config: AuthConfig) -> Self {
        Self { pool, config }
    }

    /// Hashes the password and stores a new user with `join_at` and
    /// `last_login_at` set to now.
    ///
    /// Fails with [`Error::Conflict`] when the username is taken.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        phone: &str,
    ) -> Result<RegisteredUser> {
        let password_hash = hash_password(password, self.config.work_factor).await?;
        let now = Utc::now();

        let user = sqlx::query_as::<_, RegisteredUser>(
            r#"
            INSERT INTO users (username, password, first_name, last_name, phone, join_at, last_login_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING username, password, first_name, last_name, phone
            "#,
        )
        .bind(username)
        .bind(&password_hash)
        .bind(first_name)
        .bind(last_name)
        .bind(phone)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Error::Conflict(username.to_string())
            }
            other => Error::Store(other),
        })?;

        tracing::info!(username = %user.username, "registered user");
        Ok(user)
    }

    /// Returns true only when the user exists and the password matches.
    /// An unknown username is indistinguishable from a wrong password.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let stored: Option<String> = sqlx::query_scalar("SELECT password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool.as_ref())
            .await?;

        let Some(hash) = stored else {
            tracing::debug!(username, "authentication for unknown user");
            return Ok(false);
        };

        verify_password(password, hash).await
    }

    /// Sets `last_login_at` to now. Unknown usernames are silently ignored.
    pub async fn update_login_timestamp(&self, username: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET last_login_at = ? WHERE username = ?")
            .bind(Utc::now())
            .bind(username)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(username, "login timestamp update matched no user");
        }
        Ok(())
    }

    pub fn issue_session_claim(&self, username: &str) -> Result<String> {
        let claims = Claims {
            username: username.to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret_key.as_bytes()),
        )?;
        Ok(token)
    }

    /// Returns the username bound to a token signed with our secret, or
    /// `None` when the token is malformed or the signature does not match.
    pub fn verify_session_claim(&self, token: &str) -> Option<String> {
        let mut validation = Validation::default();
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret_key.as_bytes()),
            &validation,
        )
        .map(|data| data.claims.username)
        .ok()
    }
}

// bcrypt is deliberately slow, so it runs on the blocking pool.
async fn hash_password(password: &str, work_factor: u32) -> Result<String> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, work_factor)).await??;
    Ok(hash)
}

async fn verify_password(password: &str, hash: String) -> Result<bool> {
    let password = password.to_string();
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(matches)
}

/// Username of the caller, inserted into request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

// Middleware to validate the bearer token
pub async fn auth_middleware(
    State(credentials): State<Credentials>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok());

    let token = match auth_header.and_then(|header| header.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => {
            return Err(api_error(StatusCode::UNAUTHORIZED, "Missing bearer token"));
        }
    };

    match credentials.verify_session_claim(token) {
        Some(username) => {
            request.extensions_mut().insert(AuthUser(username));
            Ok(next.run(request).await)
        }
        None => {
            tracing::debug!("rejected request with invalid token");
            Err(api_error(StatusCode::UNAUTHORIZED, "Invalid token"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::directory::Directory;

    fn test_config() -> AuthConfig {
        AuthConfig {
            work_factor: 4,
            secret_key: "test-secret".to_string(),
        }
    }

    async fn setup() -> (Credentials, Directory) {
        let pool = test_pool().await;
        (
            Credentials::new(pool.clone(), test_config()),
            Directory::new(pool),
        )
    }

    #[tokio::test]
    async fn register_stores_user_and_rejects_duplicates() {
        let (credentials, directory) = setup().await;

        let user = credentials
            .register("alice", "hunter2", "Alice", "Smith", "555-0100")
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.first_name, "Alice");

        let detail = directory.get_user("alice").await.unwrap().unwrap();
        assert_eq!(detail.first_name, "Alice");
        assert_eq!(detail.last_name, "Smith");
        assert_eq!(detail.phone, "555-0100");
        assert_eq!(detail.last_login_at, Some(detail.join_at));

        let err = credentials
            .register("alice", "other", "A", "B", "C")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref name) if name == "alice"));
    }

    #[tokio::test]
    async fn stored_hash_is_salted_and_never_plaintext() {
        let (credentials, _) = setup().await;

        let a = credentials.register("a", "same-password", "A", "A", "1").await.unwrap();
        let b = credentials.register("b", "same-password", "B", "B", "2").await.unwrap();

        assert_ne!(a.password, "same-password");
        assert_ne!(a.password, b.password);
        assert!(a.password.starts_with("$2"));
    }

    #[tokio::test]
    async fn registered_user_serializes_without_hash() {
        let (credentials, _) = setup().await;
        let user = credentials.register("carol", "pw", "Carol", "C", "3").await.unwrap();

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "carol");
    }

    #[tokio::test]
    async fn authenticate_checks_password_and_hides_unknown_users() {
        let (credentials, _) = setup().await;
        credentials.register("alice", "hunter2", "Alice", "Smith", "1").await.unwrap();

        assert!(credentials.authenticate("alice", "hunter2").await.unwrap());
        assert!(!credentials.authenticate("alice", "hunter3").await.unwrap());
        assert!(!credentials.authenticate("nobody", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn authenticate_does_not_touch_login_timestamp() {
        let (credentials, directory) = setup().await;
        credentials.register("alice", "pw", "Alice", "S", "1").await.unwrap();
        let before = directory.get_user("alice").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(credentials.authenticate("alice", "pw").await.unwrap());

        let after = directory.get_user("alice").await.unwrap().unwrap();
        assert_eq!(before.last_login_at, after.last_login_at);
    }

    #[tokio::test]
    async fn update_login_timestamp_moves_forward() {
        let (credentials, directory) = setup().await;
        credentials.register("alice", "pw", "Alice", "S", "1").await.unwrap();
        let before = directory.get_user("alice").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        credentials.update_login_timestamp("alice").await.unwrap();

        let after = directory.get_user("alice").await.unwrap().unwrap();
        assert!(after.last_login_at > before.last_login_at);
        assert_eq!(after.join_at, before.join_at);
    }

    #[tokio::test]
    async fn update_login_timestamp_ignores_unknown_user() {
        let (credentials, _) = setup().await;
        credentials.update_login_timestamp("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn session_claim_round_trips_with_same_secret_only() {
        let (credentials, _) = setup().await;
        let token = credentials.issue_session_claim("alice").unwrap();

        assert_eq!(credentials.verify_session_claim(&token).as_deref(), Some("alice"));

        let other = Credentials::new(
            test_pool().await,
            AuthConfig {
                work_factor: 4,
                secret_key: "different".to_string(),
            },
        );
        assert_eq!(other.verify_session_claim(&token), None);
        assert_eq!(credentials.verify_session_claim("not-a-token"), None);
    }

    #[tokio::test]
    async fn register_reports_other_insert_failures_as_store_errors() {
        let pool = test_pool().await;
        let credentials = Credentials::new(pool.clone(), test_config());
        sqlx::query(
            r#"
            CREATE TRIGGER reject_signups BEFORE INSERT ON users
            BEGIN
                SELECT RAISE(ABORT, 'signups closed');
            END
            "#,
        )
        .execute(pool.as_ref())
        .await
        .unwrap();

        let err = credentials
            .register("alice", "pw", "Alice", "S", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn authenticate_surfaces_store_failures() {
        let (credentials, _) = setup().await;
        credentials.pool.close().await;

        let err = credentials.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
