use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::cache::TtlCache;
use crate::server::config::AppConfig;
use crate::services::ingest_service::IngestService;
use crate::web::routes::{admin_routes, company_routes, ingest_routes};

pub mod error;
pub mod middleware;
pub mod routes;

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub ingest: IngestService,
    pub summaries_cache: TtlCache<serde_json::Value>,
}

/// Dashboards poll aggressively; force revalidation on every response.
async fn no_store_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let protected = Router::new()
        .route("/api/backup", post(ingest_routes::receive_backup))
        .route("/api/health", post(ingest_routes::receive_health))
        .route("/api/replication", post(ingest_routes::receive_replication))
        .route("/api/clear_logs", post(admin_routes::clear_logs))
        .route("/api/clear_all_logs", post(admin_routes::clear_all_logs))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_api_token,
        ));

    Router::new()
        .merge(protected)
        .route("/api/companies", get(company_routes::list_companies))
        .route("/api/v2/summaries", get(company_routes::summaries_v2))
        .route(
            "/api/company/{company}/recent",
            get(company_routes::company_recent),
        )
        .route("/health", get(company_routes::health_overview))
        .layer(axum_middleware::map_response(no_store_headers))
        .layer(cors)
        .with_state(state)
}

pub async fn run_http_server(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);
    info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
