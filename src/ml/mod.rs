/*!
 * # Forecasting Models
 *
 * Per-item demand forecasting for menu items:
 *
 * - `features`: the shared feature schema and the training-row builder
 * - `regressor`: the `Regressor` trait and the linear model fitted with linfa
 * - `forecasting`: the recursive multi-step forecaster
 * - `trainer`: per-item model fitting with a minimum-history gate
 * - `evaluation`: chronological holdout evaluation
 */

pub mod evaluation;
pub mod features;
pub mod forecasting;
pub mod regressor;
pub mod trainer;

use thiserror::Error;

pub use features::{build_features, Feature, FeatureRow, LagFeatures, TrainingRow};
pub use forecasting::{
    ForecastStep, NoPromotions, PromoCalendar, RecursiveForecaster, ScheduledPromotions,
    FORECAST_HORIZON_DAYS,
};
pub use regressor::{LinearModel, ModelArtifact, Regressor, RidgeFitter, MODEL_NAME};
pub use trainer::{ModelTrainer, SkippedItem, TrainingReport, DEFAULT_MIN_HISTORY_ROWS};

/// Errors raised while fitting, loading or running a per-item model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("item {0} has no sales history")]
    EmptyHistory(String),

    #[error("item {item_id} has {rows} feature rows, {required} required")]
    InsufficientHistory {
        item_id: String,
        rows: usize,
        required: usize,
    },

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("feature mismatch: {0}")]
    FeatureMismatch(String),

    #[error("model produced a non-finite prediction for {item_id} on {date}")]
    NonFinitePrediction {
        item_id: String,
        date: chrono::NaiveDate,
    },

    #[error("forecast date out of range after {0}")]
    DateOutOfRange(chrono::NaiveDate),
}
