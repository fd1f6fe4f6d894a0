//! Menu demand forecasting service.
//!
//! Trains one regression model per menu item from daily sales, forecasts the
//! next week recursively and writes the forecasts back to the document store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod ml;
pub mod models;
pub mod repositories;
pub mod services;
pub mod tracing;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{http::HeaderValue, Router};
use tower_http::cors::{Any, CorsLayer};

use services::ForecastingService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ForecastingService>,
    /// Key file checked on every training request; `None` when running
    /// against the emulator.
    pub credentials_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(service: Arc<ForecastingService>, credentials_path: Option<PathBuf>) -> Self {
        Self {
            service,
            credentials_path,
        }
    }
}

/// All routes with request id propagation and HTTP tracing applied.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .merge(handlers::training::training_routes())
        .with_state(state)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}

/// CORS restricted to `origins`; unparsable entries are dropped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
