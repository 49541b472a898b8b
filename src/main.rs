mod auth;
mod config;
mod db;
mod directory;
mod error;
mod handlers;
mod models;

use auth::Credentials;
use directory::Directory;
use handlers::AppState;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "messagely_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env().expect("Invalid configuration");

    let pool = db::init_db(&config.database_url)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database initialized successfully");

    let state = AppState {
        credentials: Credentials::new(pool.clone(), config.auth.clone()),
        directory: Directory::new(pool),
    };
    let app = handlers::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        work_factor = config.auth.work_factor,
        "Server listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
