pub mod admin_routes;
pub mod company_routes;
pub mod ingest_routes;
