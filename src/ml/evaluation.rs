//! Chronological holdout evaluation of the per-item models.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::features::build_features;
use super::regressor::{Regressor, RidgeFitter};
use super::ModelError;
use crate::models::ItemHistory;

/// Items with fewer feature rows are not evaluated.
pub const MIN_EVALUATION_ROWS: usize = 40;
/// Share of rows, oldest first, used for fitting.
pub const TRAIN_FRACTION: f64 = 0.8;

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    mean(actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()))
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    mean(actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2))).sqrt()
}

/// Mean absolute percentage error over the non-zero actuals, in percent.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let errors: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    if errors.is_empty() {
        return None;
    }
    Some(mean(errors.into_iter()) * 100.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEvaluation {
    pub item_id: String,
    pub test_days: usize,
    pub mae: f64,
    pub rmse: f64,
    pub mape: Option<f64>,
    pub mean_actual: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    /// Sorted by MAE, best first.
    pub items: Vec<ItemEvaluation>,
    pub overall_mae: Option<f64>,
    pub overall_rmse: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    fitter: RidgeFitter,
}

impl Evaluator {
    pub fn new(fitter: RidgeFitter) -> Self {
        Self { fitter }
    }

    /// Fits on the oldest 80% of feature rows and scores the newest 20%.
    ///
    /// Test rows are predicted with their observed features, not recursively.
    /// Returns `Ok(None)` for items below [`MIN_EVALUATION_ROWS`].
    pub fn evaluate_item(&self, history: &ItemHistory) -> Result<Option<ItemEvaluation>, ModelError> {
        let rows = build_features(history);
        if rows.len() < MIN_EVALUATION_ROWS {
            return Ok(None);
        }

        let split = (rows.len() as f64 * TRAIN_FRACTION) as usize;
        let (train, test) = rows.split_at(split);
        let model = self.fitter.fit(train)?;

        let actual: Vec<f64> = test.iter().map(|r| r.target).collect();
        let predicted = test
            .iter()
            .map(|r| model.predict(&r.features))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ItemEvaluation {
            item_id: history.item_id().to_string(),
            test_days: test.len(),
            mae: mae(&actual, &predicted),
            rmse: rmse(&actual, &predicted),
            mape: mape(&actual, &predicted),
            mean_actual: mean(actual.iter().copied()),
        }))
    }

    pub fn evaluate_all(&self, histories: &BTreeMap<String, ItemHistory>) -> EvaluationSummary {
        let mut items = Vec::new();
        for (item_id, history) in histories {
            match self.evaluate_item(history) {
                Ok(Some(evaluation)) => items.push(evaluation),
                Ok(None) => debug!(item_id = %item_id, "too little history to evaluate"),
                Err(e) => warn!(item_id = %item_id, error = %e, "evaluation failed"),
            }
        }
        items.sort_by(|a, b| a.mae.total_cmp(&b.mae));

        let (overall_mae, overall_rmse) = if items.is_empty() {
            (None, None)
        } else {
            (
                Some(mean(items.iter().map(|i| i.mae))),
                Some(mean(items.iter().map(|i| i.rmse))),
            )
        };

        EvaluationSummary {
            items,
            overall_mae,
            overall_rmse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{group_by_item, SalesRecord};
    use chrono::NaiveDate;

    fn records(item: &str, days: usize, noise: f64) -> Vec<SalesRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|i| {
                let wobble = if i % 2 == 0 { noise } else { -noise };
                SalesRecord::new(
                    start + chrono::Duration::days(i as i64),
                    item,
                    20.0 + wobble,
                    false,
                )
            })
            .collect()
    }

    #[test]
    fn metrics_on_known_values() {
        let actual = [2.0, 4.0, 0.0];
        let predicted = [3.0, 2.0, 1.0];
        assert!((mae(&actual, &predicted) - 4.0 / 3.0).abs() < 1e-12);
        assert!((rmse(&actual, &predicted) - 2.0f64.sqrt()).abs() < 1e-12);
        // zero actual excluded: (0.5 + 0.5) / 2
        assert!((mape(&actual, &predicted).unwrap() - 50.0).abs() < 1e-12);
        assert_eq!(mape(&[0.0], &[1.0]), None);
    }

    #[test]
    fn split_truncates_toward_training() {
        // 28 + 45 = 73 records -> 45 feature rows -> 36 train, 9 test
        let history = ItemHistory::new("mocha", records("mocha", 73, 1.0));
        let evaluation = Evaluator::default().evaluate_item(&history).unwrap().unwrap();
        assert_eq!(evaluation.test_days, 9);
        assert!((evaluation.mean_actual - 20.0).abs() < 1.0);
    }

    #[test]
    fn short_items_are_not_evaluated() {
        let history = ItemHistory::new("chai", records("chai", 67, 1.0));
        assert_eq!(Evaluator::default().evaluate_item(&history).unwrap(), None);
    }

    #[test]
    fn summary_sorted_by_mae() {
        let mut all = records("noisy", 90, 6.0);
        all.extend(records("steady", 90, 0.5));
        all.extend(records("tiny", 30, 0.0));
        let summary = Evaluator::default().evaluate_all(&group_by_item(all));

        let ids: Vec<&str> = summary.items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["steady", "noisy"]);
        assert!(summary.overall_mae.is_some());
        assert!(summary.overall_rmse.unwrap() >= summary.overall_mae.unwrap());
    }
}
