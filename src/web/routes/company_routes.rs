use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::services::rollup_service::{self, CompanyRollup, HealthOverviewRow};
use crate::web::{error::AppError, AppState};

/// Query parameters arrive from heterogeneous dashboards; anything
/// unparseable falls back to the default rather than rejecting.
fn param_or<T: FromStr + Copy>(params: &HashMap<String, String>, key: &str, default: T) -> T {
    params
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<CompanyRollup>>, AppError> {
    let limit = param_or(&params, "limit", 6i64);
    let rollups = rollup_service::tenant_summaries(&state.pool, limit).await?;
    Ok(Json(rollups))
}

pub async fn summaries_v2(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let page = param_or(&params, "page", 1i64).max(1);
    let per_page = param_or(&params, "per_page", 50i64).clamp(10, 100);

    // Cache key covers every input parameter; writes never consult this.
    let cache_key = format!("summaries_v2:page={page}:per_page={per_page}");
    if let Some(hit) = state.summaries_cache.get(&cache_key) {
        return Ok(Json(hit));
    }

    let (data, pagination) = rollup_service::fleet_summaries_page(&state.pool, page, per_page).await?;
    let body = json!({ "data": data, "pagination": pagination });
    state.summaries_cache.insert(
        cache_key,
        body.clone(),
        Duration::from_secs(state.config.cache.summaries_ttl_secs),
    );
    Ok(Json(body))
}

pub async fn company_recent(
    State(state): State<Arc<AppState>>,
    Path(company): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let page = param_or(&params, "page", 1i64);
    let per_page = param_or(&params, "per_page", 20i64);

    let (backups, pagination) =
        rollup_service::tenant_recent(&state.pool, company.trim(), page, per_page).await?;
    Ok(Json(json!({ "backups": backups, "pagination": pagination })))
}

pub async fn health_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HealthOverviewRow>>, AppError> {
    let rows = rollup_service::health_overview(&state.pool, 100).await?;
    Ok(Json(rows))
}
