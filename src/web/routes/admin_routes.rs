use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::db::services::backup_service;
use crate::web::{error::AppError, AppState};

#[derive(Deserialize)]
pub struct ClearLogsRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Unconditional time-ranged delete over the backup log; both dates are
/// inclusive, the end date through the last second of that day. Not
/// retention-policy-aware.
pub async fn clear_logs(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClearLogsRequest>,
) -> Result<Json<Value>, AppError> {
    let start = req
        .start_date
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing 'start_date'".to_string()))?;
    let end = req
        .end_date
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing 'end_date'".to_string()))?;

    let start_ts = day_bound(start, 0, 0, 0)?;
    let end_ts = day_bound(end, 23, 59, 59)?;

    let deleted = backup_service::purge_range(&state.pool, start_ts, end_ts).await?;
    info!(start, end, deleted, "purged backup events in range");
    Ok(Json(json!({ "deleted_count": deleted })))
}

/// Full clear of the backup log.
pub async fn clear_all_logs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let deleted = backup_service::purge_all(&state.pool).await?;
    info!(deleted, "purged all backup events");
    Ok(Json(json!({ "deleted_count": deleted })))
}

fn day_bound(date: &str, hour: u32, min: u32, sec: u32) -> Result<i64, AppError> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| AppError::InvalidInput(format!("invalid date '{date}': {e}")))?;
    let dt = date
        .and_hms_opt(hour, min, sec)
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .ok_or_else(|| AppError::InvalidInput(format!("invalid date '{date}'")))?;
    Ok(dt.timestamp())
}
