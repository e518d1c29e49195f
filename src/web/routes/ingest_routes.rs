use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::services::ingest_service::{BackupOutcome, ReplicationOutcome};
use crate::web::{error::AppError, AppState};

pub async fn receive_backup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    match state.ingest.ingest_backup(payload).await? {
        BackupOutcome::Stored => Ok((
            StatusCode::CREATED,
            Json(json!({ "message": "Data received" })),
        )),
        BackupOutcome::Ignored(reason) => Ok((StatusCode::OK, Json(json!({ "ignored": reason })))),
    }
}

pub async fn receive_health(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = state.ingest.ingest_health(payload).await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok", "id": id }))))
}

pub async fn receive_replication(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    match state.ingest.ingest_replication(payload).await? {
        ReplicationOutcome::Stored => {
            Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))))
        }
        ReplicationOutcome::Duplicate => Ok((
            StatusCode::OK,
            Json(json!({ "status": "ok", "ignored": "duplicate" })),
        )),
    }
}
