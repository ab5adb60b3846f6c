//! JSON API server over the step engine.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::io::config::AgentConfig;

pub use routes::api_router;
pub use state::AppState;

/// Build the full application with CORS applied.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the process is stopped.
pub fn serve(workdir: PathBuf, config: AgentConfig, bind: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("parse bind address {bind}:{port}"))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(async move {
        info!(workdir = %workdir.display(), "starting api server");
        let app = app(AppState::new(workdir, config));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!(addr = %addr, "listening");
        axum::serve(listener, app).await.context("serve api")?;
        Ok(())
    })
}
