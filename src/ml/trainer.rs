use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::features::build_features;
use super::regressor::{ModelArtifact, RidgeFitter};
use super::ModelError;
use crate::models::ItemHistory;

/// Items with fewer feature rows than this are not trained.
pub const DEFAULT_MIN_HISTORY_ROWS: usize = 10;

/// An item the trainer did not produce a model for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub artifacts: Vec<ModelArtifact>,
    pub skipped: Vec<SkippedItem>,
}

impl TrainingReport {
    pub fn trained(&self) -> usize {
        self.artifacts.len()
    }
}

/// Fits one model per item.
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    min_history_rows: usize,
    fitter: RidgeFitter,
}

impl Default for ModelTrainer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_HISTORY_ROWS, RidgeFitter::default())
    }
}

impl ModelTrainer {
    pub fn new(min_history_rows: usize, fitter: RidgeFitter) -> Self {
        Self {
            min_history_rows: min_history_rows.max(1),
            fitter,
        }
    }

    pub fn min_history_rows(&self) -> usize {
        self.min_history_rows
    }

    pub fn fitter(&self) -> &RidgeFitter {
        &self.fitter
    }

    /// Featurises and fits a single item.
    pub fn train_item(&self, history: &ItemHistory) -> Result<ModelArtifact, ModelError> {
        let rows = build_features(history);
        if rows.len() < self.min_history_rows {
            return Err(ModelError::InsufficientHistory {
                item_id: history.item_id().to_string(),
                rows: rows.len(),
                required: self.min_history_rows,
            });
        }
        let model = self.fitter.fit(&rows)?;
        Ok(ModelArtifact::new(history.item_id(), model, rows.len()))
    }

    /// Trains every item, skipping short histories and failed fits.
    pub fn train_all(&self, histories: &BTreeMap<String, ItemHistory>) -> TrainingReport {
        let mut report = TrainingReport::default();

        for (item_id, history) in histories {
            match self.train_item(history) {
                Ok(artifact) => {
                    debug!(item_id = %item_id, rows = artifact.training_rows, "trained item model");
                    report.artifacts.push(artifact);
                }
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "skipping item");
                    report.skipped.push(SkippedItem {
                        item_id: item_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
