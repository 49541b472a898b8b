use crate::auth::{auth_middleware, AuthUser, Credentials};
use crate::directory::Directory;
use crate::error::Error;
use crate::models::*;
use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub credentials: Credentials,
    pub directory: Directory,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Conflict(username) => api_error(
                StatusCode::CONFLICT,
                format!("Username '{}' already exists", username),
            ),
            other => {
                tracing::error!("request failed: {}", other);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let users = Router::new()
        .route("/users", get(list_users))
        .route("/users/:username", get(get_user))
        .route("/users/:username/to", get(messages_to))
        .route("/users/:username/from", get(messages_from))
        .route_layer(middleware::from_fn_with_state(
            state.credentials.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .merge(users)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    let fields = [
        &payload.username,
        &payload.password,
        &payload.first_name,
        &payload.last_name,
        &payload.phone,
    ];
    if fields.iter().any(|field| field.is_empty()) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Please include 'username', 'password', 'first_name', 'last_name', and 'phone'",
        ));
    }

    let user = state
        .credentials
        .register(
            &payload.username,
            &payload.password,
            &payload.first_name,
            &payload.last_name,
            &payload.phone,
        )
        .await?;

    let token = state.credentials.issue_session_claim(&user.username)?;
    record_login(&state.credentials, &user.username).await;

    Ok(Json(TokenResponse { token }))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Please include 'username' and 'password'",
        ));
    }

    if !state
        .credentials
        .authenticate(&payload.username, &payload.password)
        .await?
    {
        tracing::info!(username = %payload.username, "failed login");
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Invalid username/password combination",
        ));
    }

    let token = state.credentials.issue_session_claim(&payload.username)?;
    record_login(&state.credentials, &payload.username).await;

    Ok(Json(TokenResponse { token }))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<UsersResponse>, ApiError> {
    let users = state.directory.list_all_users().await?;
    Ok(Json(UsersResponse { users }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = find_user(&state.directory, &username).await?;
    Ok(Json(UserResponse { user }))
}

pub async fn messages_to(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(username): Path<String>,
) -> Result<Json<ReceivedMessagesResponse>, ApiError> {
    ensure_correct_user(&caller, &username)?;
    find_user(&state.directory, &username).await?;

    let messages = state.directory.messages_to(&username).await?;
    Ok(Json(ReceivedMessagesResponse { messages }))
}

pub async fn messages_from(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(username): Path<String>,
) -> Result<Json<SentMessagesResponse>, ApiError> {
    ensure_correct_user(&caller, &username)?;
    find_user(&state.directory, &username).await?;

    let messages = state.directory.messages_from(&username).await?;
    Ok(Json(SentMessagesResponse { messages }))
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

// A failed timestamp update must not cost the caller a successful login.
async fn record_login(credentials: &Credentials, username: &str) {
    if let Err(e) = credentials.update_login_timestamp(username).await {
        tracing::warn!(username, error = %e, "failed to record login");
    }
}

async fn find_user(directory: &Directory, username: &str) -> Result<UserDetail, ApiError> {
    directory
        .get_user(username)
        .await?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "User not found"))
}

fn ensure_correct_user(caller: &str, username: &str) -> Result<(), ApiError> {
    if caller != username {
        tracing::warn!(caller, username, "user tried to read another user's messages");
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    Ok(())
}
