mod access;
mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod license;
mod models;
mod pagination;
mod storage;
mod validation;


use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::PasswordHasher;
use crate::config::Config;
use crate::db::DbConnection;
use crate::storage::MediaStorage;

#[derive(Clone)]
pub struct AppState {
    pub db: DbConnection,
    pub media: MediaStorage,
    pub hasher: PasswordHasher,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let media_route = format!("{}*name", state.config.media_url);

    Router::new()
        .route("/registration", post(handlers::register_user))
        .route("/api-token-auth", post(handlers::login_user))
        .route("/user-details", get(handlers::user_details))
        .route("/trial-license-check", get(handlers::trial_license_check))
        .route("/user-files", get(handlers::list_user_files))
        .route("/all-files", get(handlers::list_all_files))
        .route("/post-file", post(handlers::upload_file))
        .route("/delete-file/:file_id", delete(handlers::delete_file))
        .route(&media_route, get(handlers::serve_media))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads .env, so it runs before the subscriber picks up RUST_LOG.
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = db::establish_connection(&config.database_path)?;
    let media = MediaStorage::new(config.media_root.clone()).await?;
    tracing::info!(
        database = %config.database_path,
        media_root = %media.root().display(),
        "Storage ready"
    );

    let hasher = PasswordHasher::new(config.bcrypt_cost)?;

    let address = config.bind_address();
    let state = AppState {
        db,
        media,
        hasher,
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Server running on http://{}", address);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
