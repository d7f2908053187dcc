use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::comment::CommentService;
use super::db::{ClaDb, DbHandle};
use super::github::{GitHubApi, RestClient};
use super::orchestrator::ClaOrchestrator;
use super::status::StatusPropagator;
use super::store::{ClaRecords, RepoDirectory, RepoStore};
use super::urls::ClaUrls;
use crate::config::ClaConfig;

/// Configuration for the CLA server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub base_url: String,
    pub api_url: String,
    pub user_agent: String,
    pub per_page: u32,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ClaConfig::default())
    }
}

impl From<&ClaConfig> for ServerConfig {
    fn from(config: &ClaConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            base_url: config.server.base_url.clone(),
            api_url: config.github.api_url.clone(),
            user_agent: config.github.user_agent.clone(),
            per_page: config.github.per_page,
            dev_mode: false,
        }
    }
}

/// Wire the concrete stores and forge client into the shared state.
pub fn build_state(db: DbHandle, github: Arc<dyn GitHubApi>, config: &ServerConfig) -> Arc<AppState> {
    let urls = ClaUrls::new(&config.base_url);
    let repos: Arc<dyn RepoDirectory> = Arc::new(RepoStore::new(db.clone()));
    let store = Arc::new(ClaRecords::new(db, github.clone()));
    let status = Arc::new(StatusPropagator::new(repos.clone(), github.clone(), urls.clone()));
    let comments = Arc::new(CommentService::new(repos.clone(), github.clone(), urls));
    let orchestrator = ClaOrchestrator::new(github.clone(), repos.clone(), store, status, comments)
        .with_per_page(config.per_page);

    Arc::new(AppState {
        orchestrator,
        repos,
        github,
    })
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Start the CLA server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = ClaDb::new(&config.db_path).context("Failed to initialize CLA database")?;
    let github: Arc<dyn GitHubApi> = Arc::new(RestClient::new(&config.api_url, &config.user_agent)?);
    let state = build_state(DbHandle::new(db), github, &config);
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, base_url = %config.base_url, "CLA assistant listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
