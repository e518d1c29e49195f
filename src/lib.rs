pub mod alerting;
pub mod cache;
pub mod db;
pub mod server;
pub mod services;
pub mod web;
