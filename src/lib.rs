pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod model;
pub mod models;
pub mod rbac;
pub mod response;
pub mod routes;
pub mod subscription;
pub mod utils;

use actix_web::{HttpResponse, ResponseError, web};

use crate::config::Config;
use crate::error::ApiError;
use crate::routes::RateLimits;

/// Extractor error handlers plus every route. Shared by the server and the
/// HTTP tests so both run the same configuration.
pub fn configure_app(cfg: &mut web::ServiceConfig, config: &Config, limits: &RateLimits) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| {
        ApiError::validation(format!("Invalid JSON body: {err}")).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _| {
        ApiError::validation(format!("Invalid query string: {err}")).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _| {
        ApiError::validation(format!("Invalid path parameter: {err}")).into()
    }));

    routes::configure(cfg, config, limits);
}

/// Fallback for unmatched routes, rendered in the standard envelope.
pub async fn not_found() -> HttpResponse {
    ApiError::NotFound("Route not found".into()).error_response()
}
