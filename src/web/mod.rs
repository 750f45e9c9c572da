mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::db::Database;
use crate::feed::PostWriter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub writer: PostWriter,
    pub verifier: TokenVerifier,
}

impl AppState {
    /// Build the state for a database handle and a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no token secret is configured.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let verifier = TokenVerifier::hs256(config.require_jwt_secret()?);
        let writer = PostWriter::new(db.clone(), config.max_tags_per_post);
        Ok(Self {
            db,
            config: Arc::new(config),
            writer,
            verifier,
        })
    }
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Start the web server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve(config: Config, db: Database) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.web_host, config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let app = create_app(AppState::new(config, db)?);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .await
        .context("Web server error")?;

    Ok(())
}

/// Create the main application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
