//! `api` crate — HTTP surface of the workflow orchestrator.
//!
//! Exposes:
//!   POST   /workflow/create
//!   POST   /workflow/create/template/:name
//!   GET    /workflow/query/:id

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use error::ApiError;
pub use handlers::AppState;

use handlers::workflows;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/workflow/create", post(workflows::create))
        .route("/workflow/create/template/:name", post(workflows::create_from_template))
        .route("/workflow/query/:id", get(workflows::query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `bind` until Ctrl-C.
pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind = %bind, "api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("api shut down");
    Ok(())
}
