pub mod ingest_service;
pub mod retention_service;
pub mod rollup_service;
