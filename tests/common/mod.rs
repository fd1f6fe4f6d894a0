#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::NaiveDate;
use serde_json::Value;
use tower::ServiceExt;

use menu_forecast::{
    app_router,
    middleware_helpers::retry::RetryConfig,
    ml::{ModelTrainer, RecursiveForecaster},
    models::SalesRecord,
    repositories::{InMemoryForecastRepository, InMemoryModelStore, InMemorySalesRepository},
    services::{ForecastSink, ForecastingService, FIRESTORE_BATCH_LIMIT},
    AppState,
};

/// Router backed by in-memory repositories.
pub struct TestApp {
    router: Router,
    pub sales: Arc<InMemorySalesRepository>,
    pub forecasts: Arc<InMemoryForecastRepository>,
    pub models: Arc<InMemoryModelStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_credentials(None)
    }

    /// Requests fail with 500 unless `path` exists.
    pub fn with_credentials(path: Option<PathBuf>) -> Self {
        let sales = Arc::new(InMemorySalesRepository::new());
        let forecasts = Arc::new(InMemoryForecastRepository::new());
        let models = Arc::new(InMemoryModelStore::new());

        let sink = ForecastSink::new(
            forecasts.clone(),
            FIRESTORE_BATCH_LIMIT,
            RetryConfig::new(2, Duration::from_millis(1)),
        )
        .expect("valid batch size");
        let service = ForecastingService::new(
            sales.clone(),
            models.clone(),
            sink,
            ModelTrainer::default(),
            RecursiveForecaster::default(),
        );

        let router = app_router(AppState::new(Arc::new(service), path));
        Self {
            router,
            sales,
            forecasts,
            models,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.request(Method::POST, uri, Some(body), &[]).await
    }
}

pub async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body is not JSON")
}

/// `days` consecutive days of sales for `item` starting 2024-01-01.
pub fn daily_sales(item: &str, days: usize) -> Vec<SalesRecord> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    (0..days)
        .map(|i| {
            let units = 30.0 + ((i * 5) % 11) as f64 - if i % 7 == 6 { 8.0 } else { 0.0 };
            SalesRecord::new(
                start + chrono::Duration::days(i as i64),
                item,
                units,
                i % 10 == 0,
            )
        })
        .collect()
}
