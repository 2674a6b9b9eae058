//! HTTP API of the backup manager
//!
//! All routes live under `/api/v1`:
//! - `GET|POST /backups`, `GET|DELETE /backups/{name}`
//! - `GET|PUT /backups/{name}/expiration`, `GET /backups/{name}/download`
//! - `POST /schedules/{name}/backups`
//! - `GET /requests/{kind}`, `DELETE /requests/{kind}/{name}`
//! - `POST /server-status`

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::ExpirationBody;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::services::Services;

/// Build the API router over the shared services
pub fn router(services: Arc<Services>) -> Router {
    let v1 = Router::new()
        .route(
            "/backups",
            get(handlers::list_backups).post(handlers::create_backup),
        )
        .route(
            "/backups/{name}",
            get(handlers::get_backup).delete(handlers::delete_backup),
        )
        .route(
            "/backups/{name}/expiration",
            get(handlers::get_expiration).put(handlers::update_expiration),
        )
        .route("/backups/{name}/download", get(handlers::download_backup))
        .route(
            "/schedules/{name}/backups",
            post(handlers::create_backup_from_schedule),
        )
        .route("/requests/{kind}", get(handlers::list_requests))
        .route(
            "/requests/{kind}/{name}",
            axum::routing::delete(handlers::delete_request),
        )
        .route("/server-status", post(handlers::server_status));

    Router::new().nest("/api/v1", v1).with_state(services)
}

/// Serve the API until `shutdown` is cancelled
pub async fn serve(
    port: u16,
    services: Arc<Services>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Backup API listening");

    axum::serve(listener, router(services))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Backup API stopped");
    Ok(())
}
