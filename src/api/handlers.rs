//! Request handlers of the backup management API

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crd::{Backup, DeleteBackupRequest, ServerStatusRequestStatus};
use crate::services::{AsyncRequest, BackupQuery, CreateBackupRequest, DownloadLink, RequestKind, Services};

use super::error::ApiError;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Body of expiration reads and updates
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExpirationBody {
    pub expiration: Option<DateTime<Utc>>,
}

/// `GET /backups`
pub async fn list_backups(
    State(services): State<Arc<Services>>,
    Query(query): Query<BackupQuery>,
) -> ApiResult<Json<Vec<Backup>>> {
    Ok(Json(services.query.list_backups(&query).await?))
}

/// `GET /backups/{name}`
pub async fn get_backup(
    State(services): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Backup>> {
    Ok(Json(services.query.get_backup_details(&name).await?))
}

/// `POST /backups`
pub async fn create_backup(
    State(services): State<Arc<Services>>,
    Json(request): Json<CreateBackupRequest>,
) -> ApiResult<(StatusCode, Json<Backup>)> {
    let backup = services.creation.create_backup(request).await?;
    Ok((StatusCode::CREATED, Json(backup)))
}

/// `POST /schedules/{name}/backups`
pub async fn create_backup_from_schedule(
    State(services): State<Arc<Services>>,
    Path(schedule): Path<String>,
) -> ApiResult<(StatusCode, Json<Backup>)> {
    let backup = services
        .creation
        .create_backup_from_schedule(&schedule)
        .await?;
    Ok((StatusCode::CREATED, Json(backup)))
}

/// `DELETE /backups/{name}`
///
/// Accepted, not done: Velero removes the backup when it processes the request.
pub async fn delete_backup(
    State(services): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<DeleteBackupRequest>)> {
    let request = services.mutations.delete_backup(&name).await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

/// `GET /backups/{name}/expiration`
pub async fn get_expiration(
    State(services): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ExpirationBody>> {
    let expiration = services.mutations.get_backup_expiration(&name).await?;
    Ok(Json(ExpirationBody { expiration }))
}

/// `PUT /backups/{name}/expiration`
pub async fn update_expiration(
    State(services): State<Arc<Services>>,
    Path(name): Path<String>,
    Json(body): Json<ExpirationBody>,
) -> ApiResult<Json<Backup>> {
    let expiration = body
        .expiration
        .ok_or_else(|| crate::Error::bad_request("expiration is required"))?;
    let backup = services
        .mutations
        .update_backup_expiration(&name, expiration)
        .await?;
    Ok(Json(backup))
}

/// `GET /backups/{name}/download`
pub async fn download_backup(
    State(services): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<DownloadLink>> {
    Ok(Json(services.mutations.download_backup(&name).await?))
}

/// `GET /requests/{kind}`
pub async fn list_requests(
    State(services): State<Arc<Services>>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<AsyncRequest>>> {
    let kind: RequestKind = kind.parse()?;
    Ok(Json(services.requests.list_requests(kind).await?))
}

/// `DELETE /requests/{kind}/{name}`
pub async fn delete_request(
    State(services): State<Arc<Services>>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let kind: RequestKind = kind.parse()?;
    services.requests.delete_request(kind, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /server-status`
pub async fn server_status(
    State(services): State<Arc<Services>>,
) -> ApiResult<Json<ServerStatusRequestStatus>> {
    Ok(Json(services.requests.request_server_status().await?))
}
