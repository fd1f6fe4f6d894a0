//! Regressors and the persisted per-item model artifact.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_linear::{Link, TweedieRegressor};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::features::{Feature, FeatureRow, TrainingRow};
use super::ModelError;

/// Name recorded on every persisted forecast.
pub const MODEL_NAME: &str = "ridge_regression";

/// Predicts units sold for one named feature row.
pub trait Regressor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError>;
}

/// Linear model over named features.
///
/// Coefficients are stored next to the feature they weight, so the column
/// order of the training matrix never leaks into inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearModel {
    pub features: Vec<Feature>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    pub fn new(
        features: Vec<Feature>,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, ModelError> {
        let model = Self {
            features,
            coefficients,
            intercept,
        };
        model.validate()?;
        Ok(model)
    }

    /// Checks the feature list against the coefficients.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.features.len() != self.coefficients.len() {
            return Err(ModelError::FeatureMismatch(format!(
                "{} features but {} coefficients",
                self.features.len(),
                self.coefficients.len()
            )));
        }

        let mut seen = HashSet::with_capacity(self.features.len());
        for feature in &self.features {
            if !seen.insert(*feature) {
                return Err(ModelError::FeatureMismatch(format!(
                    "feature {} listed twice",
                    feature.name()
                )));
            }
        }

        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::FeatureMismatch(
                "model contains non-finite weights".to_string(),
            ));
        }
        Ok(())
    }

    /// Weight applied to `feature`, if the model uses it.
    pub fn weight(&self, feature: Feature) -> Option<f64> {
        self.features
            .iter()
            .position(|f| *f == feature)
            .map(|i| self.coefficients[i])
    }
}

impl Regressor for LinearModel {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        if self.features.len() != self.coefficients.len() {
            return Err(ModelError::FeatureMismatch(format!(
                "{} features but {} coefficients",
                self.features.len(),
                self.coefficients.len()
            )));
        }
        let linear: f64 = self
            .features
            .iter()
            .zip(&self.coefficients)
            .map(|(feature, weight)| row.get(*feature) * weight)
            .sum();
        Ok(self.intercept + linear)
    }
}

/// A fitted model for one item, as stored by the model repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub item_id: String,
    pub model_name: String,
    #[serde(flatten)]
    pub model: LinearModel,
    pub training_rows: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn new(item_id: impl Into<String>, model: LinearModel, training_rows: usize) -> Self {
        Self {
            item_id: item_id.into(),
            model_name: MODEL_NAME.to_string(),
            model,
            training_rows,
            trained_at: Utc::now(),
        }
    }

    /// Parses and validates a stored artifact.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        let artifact: Self = serde_json::from_slice(bytes)
            .map_err(|e| ModelError::FeatureMismatch(format!("unreadable artifact: {e}")))?;
        artifact.model.validate()?;
        Ok(artifact)
    }
}

impl Regressor for ModelArtifact {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        self.model.predict(row)
    }
}

/// Fits an L2-regularised Gaussian GLM on standardised features.
///
/// Standardisation keeps the penalty comparable across columns with very
/// different ranges (`trendIndex` vs `isPromoDay`); the fitted weights are
/// mapped back to raw feature units before they are stored. Constant columns
/// get a scale of 1 and end up with a zero weight.
#[derive(Debug, Clone)]
pub struct RidgeFitter {
    alpha: f64,
    max_iter: usize,
    tolerance: f64,
}

impl Default for RidgeFitter {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            max_iter: 500,
            tolerance: 1e-6,
        }
    }
}

impl RidgeFitter {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            ..Default::default()
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn fit(&self, rows: &[TrainingRow]) -> Result<LinearModel, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::Fit("no training rows".to_string()));
        }
        let features = Feature::ALL;

        let x = Array2::from_shape_fn((rows.len(), features.len()), |(i, j)| {
            rows[i].features.get(features[j])
        });
        let y: Array1<f64> = rows.iter().map(|r| r.target).collect();

        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| ModelError::Fit("empty design matrix".to_string()))?;
        let scales = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let standardized = (&x - &means) / &scales;

        let dataset = Dataset::new(standardized, y);
        let fitted = TweedieRegressor::params()
            .power(0.0)
            .link(Link::Identity)
            .alpha(self.alpha)
            .max_iter(self.max_iter)
            .tol(self.tolerance)
            .fit(&dataset)
            .map_err(|e| ModelError::Fit(e.to_string()))?;

        let coefficients: Vec<f64> = fitted
            .coef
            .iter()
            .zip(scales.iter())
            .map(|(w, s)| w / s)
            .collect();
        let intercept = fitted.intercept
            - coefficients
                .iter()
                .zip(means.iter())
                .map(|(w, m)| w * m)
                .sum::<f64>();

        LinearModel::new(features.to_vec(), coefficients, intercept)
    }
}
