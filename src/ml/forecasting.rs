//! Recursive multi-step forecasting.
//!
//! Each step featurises the next calendar day from the working history,
//! predicts it, and appends the rounded prediction to the history so the
//! following steps read it back as `lag1`, `lag7` and the rolling means.
//! Errors therefore compound across the horizon.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{Days, NaiveDate};

use super::features::{FeatureRow, LagFeatures};
use super::regressor::Regressor;
use super::ModelError;
use crate::models::{ForecastRow, ItemHistory};

/// Days forecast past the last observed date.
pub const FORECAST_HORIZON_DAYS: usize = 7;

/// Decides whether a future day is a promotion day.
pub trait PromoCalendar: Send + Sync {
    fn is_promo_day(&self, item_id: &str, date: NaiveDate) -> bool;
}

/// No promotions are planned. Every future day is featurised with `isPromoDay = 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPromotions;

impl PromoCalendar for NoPromotions {
    fn is_promo_day(&self, _item_id: &str, _date: NaiveDate) -> bool {
        false
    }
}

/// Promotions known ahead of time, per item and day.
#[derive(Debug, Clone, Default)]
pub struct ScheduledPromotions {
    days: HashSet<(String, NaiveDate)>,
}

impl ScheduledPromotions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(mut self, item_id: impl Into<String>, date: NaiveDate) -> Self {
        self.days.insert((item_id.into(), date));
        self
    }
}

impl PromoCalendar for ScheduledPromotions {
    fn is_promo_day(&self, item_id: &str, date: NaiveDate) -> bool {
        self.days.contains(&(item_id.to_string(), date))
    }
}

/// One forecast step with the inputs that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastStep {
    pub row: ForecastRow,
    pub features: FeatureRow,
    pub raw_prediction: f64,
}

#[derive(Clone)]
pub struct RecursiveForecaster {
    horizon: usize,
    promotions: Arc<dyn PromoCalendar>,
}

impl fmt::Debug for RecursiveForecaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveForecaster")
            .field("horizon", &self.horizon)
            .finish_non_exhaustive()
    }
}

impl Default for RecursiveForecaster {
    fn default() -> Self {
        Self::new(FORECAST_HORIZON_DAYS)
    }
}

impl RecursiveForecaster {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon,
            promotions: Arc::new(NoPromotions),
        }
    }

    pub fn with_promotions(mut self, promotions: Arc<dyn PromoCalendar>) -> Self {
        self.promotions = promotions;
        self
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Forecast rows for the `horizon` days after the item's last observed date.
    pub fn forecast<R>(&self, model: &R, history: &ItemHistory) -> Result<Vec<ForecastRow>, ModelError>
    where
        R: Regressor + ?Sized,
    {
        Ok(self
            .forecast_steps(model, history)?
            .into_iter()
            .map(|step| step.row)
            .collect())
    }

    /// Like [`forecast`](Self::forecast) but keeps each step's features and raw output.
    pub fn forecast_steps<R>(
        &self,
        model: &R,
        history: &ItemHistory,
    ) -> Result<Vec<ForecastStep>, ModelError>
    where
        R: Regressor + ?Sized,
    {
        let item_id = history.item_id();
        let (Some(first_date), Some(last_date)) = (history.first_date(), history.last_date())
        else {
            return Err(ModelError::EmptyHistory(item_id.to_string()));
        };

        let mut working = history.units();
        working.reserve(self.horizon);
        let mut steps = Vec::with_capacity(self.horizon);

        for offset in 1..=self.horizon as u64 {
            let date = last_date
                .checked_add_days(Days::new(offset))
                .ok_or(ModelError::DateOutOfRange(last_date))?;
            let lags = LagFeatures::with_fallback(&working)
                .ok_or_else(|| ModelError::EmptyHistory(item_id.to_string()))?;
            let promo = self.promotions.is_promo_day(item_id, date);
            let features = FeatureRow::new(date, first_date, promo, lags);

            let raw_prediction = model.predict(&features)?;
            if !raw_prediction.is_finite() {
                return Err(ModelError::NonFinitePrediction {
                    item_id: item_id.to_string(),
                    date,
                });
            }
            // Ties go to the even neighbour; `as` saturates at u32::MAX.
            let units = raw_prediction.round_ties_even().max(0.0) as u32;

            working.push(f64::from(units));
            steps.push(ForecastStep {
                row: ForecastRow {
                    date,
                    item_id: item_id.to_string(),
                    predicted_units: units,
                },
                features,
                raw_prediction,
            });
        }

        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::Feature;
    use crate::ml::regressor::LinearModel;
    use crate::models::SalesRecord;

    fn history(units: &[f64]) -> ItemHistory {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let records = units
            .iter()
            .enumerate()
            .map(|(i, u)| SalesRecord::new(start + chrono::Duration::days(i as i64), "bagel", *u, false))
            .collect();
        ItemHistory::new("bagel", records)
    }

    /// Predicts lag1 + 1 so each step is distinguishable.
    fn incrementing() -> LinearModel {
        LinearModel::new(vec![Feature::Lag1], vec![1.0], 1.0).unwrap()
    }

    struct Constant(f64);

    impl Regressor for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn predict(&self, _row: &FeatureRow) -> Result<f64, ModelError> {
            Ok(self.0)
        }
    }

    #[test]
    fn worked_example_first_two_steps() {
        let h = history(&[10.0, 12.0, 9.0, 11.0, 14.0, 13.0, 15.0]);
        let steps = RecursiveForecaster::default()
            .forecast_steps(&incrementing(), &h)
            .unwrap();

        let first = &steps[0].features.lags;
        assert_eq!(first.lag1, 15.0);
        assert_eq!(first.lag7, 10.0);
        assert_eq!(first.roll7, 12.0);
        assert_eq!(steps[0].row.predicted_units, 16);

        // step 2 sees the day-8 prediction as lag1 and in the rolling window
        let second = &steps[1].features.lags;
        assert_eq!(second.lag1, 16.0);
        assert_eq!(second.lag7, 12.0);
        let expected_roll7 = (12.0 + 9.0 + 11.0 + 14.0 + 13.0 + 15.0 + 16.0) / 7.0;
        assert!((second.roll7 - expected_roll7).abs() < 1e-12);
    }

    #[test]
    fn emits_horizon_rows_on_consecutive_days() {
        let h = history(&[5.0; 40]);
        let rows = RecursiveForecaster::default().forecast(&incrementing(), &h).unwrap();

        assert_eq!(rows.len(), FORECAST_HORIZON_DAYS);
        let last = h.last_date().unwrap();
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.date, last + chrono::Duration::days(i as i64 + 1));
            assert_eq!(row.item_id, "bagel");
        }
        let units: Vec<u32> = rows.iter().map(|r| r.predicted_units).collect();
        assert_eq!(units, vec![6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn short_history_uses_lag1_for_lag7() {
        let h = history(&[3.0, 4.0]);
        let steps = RecursiveForecaster::default()
            .forecast_steps(&incrementing(), &h)
            .unwrap();
        // history grows to 2 + 4 = 6 values before the fifth step; still short
        for step in &steps[..5] {
            assert_eq!(step.features.lags.lag7, step.features.lags.lag1);
        }
        assert_eq!(steps[0].features.lags.roll28, 3.5);
    }

    #[test]
    fn negative_predictions_clamp_to_zero() {
        let h = history(&[1.0; 10]);
        let rows = RecursiveForecaster::default()
            .forecast(&Constant(-4.2), &h)
            .unwrap();
        assert!(rows.iter().all(|r| r.predicted_units == 0));
    }

    #[test]
    fn rounds_half_to_even() {
        let h = history(&[1.0; 10]);
        let forecaster = RecursiveForecaster::new(1);
        assert_eq!(forecaster.forecast(&Constant(2.5), &h).unwrap()[0].predicted_units, 2);
        assert_eq!(forecaster.forecast(&Constant(3.5), &h).unwrap()[0].predicted_units, 4);
        assert_eq!(forecaster.forecast(&Constant(3.49), &h).unwrap()[0].predicted_units, 3);
    }

    #[test]
    fn empty_history_is_rejected() {
        let err = RecursiveForecaster::default()
            .forecast(&incrementing(), &history(&[]))
            .unwrap_err();
        assert_eq!(err, ModelError::EmptyHistory("bagel".into()));
    }

    #[test]
    fn non_finite_prediction_is_an_error() {
        let err = RecursiveForecaster::default()
            .forecast(&Constant(f64::NAN), &history(&[1.0]))
            .unwrap_err();
        assert!(matches!(err, ModelError::NonFinitePrediction { .. }));
    }

    #[test]
    fn future_days_default_to_no_promotion() {
        let steps = RecursiveForecaster::default()
            .forecast_steps(&incrementing(), &history(&[2.0; 30]))
            .unwrap();
        assert!(steps.iter().all(|s| !s.features.is_promo_day));
    }

    #[test]
    fn scheduled_promotions_are_featurised() {
        let h = history(&[2.0; 30]);
        let promo_date = h.last_date().unwrap() + chrono::Duration::days(3);
        let calendar = ScheduledPromotions::new().schedule("bagel", promo_date);
        let model = LinearModel::new(vec![Feature::IsPromoDay], vec![10.0], 1.0).unwrap();

        let rows = RecursiveForecaster::default()
            .with_promotions(Arc::new(calendar))
            .forecast(&model, &h)
            .unwrap();
        let promo_rows: Vec<_> = rows.iter().filter(|r| r.predicted_units == 11).collect();
        assert_eq!(promo_rows.len(), 1);
        assert_eq!(promo_rows[0].date, promo_date);
    }

    #[test]
    fn trend_index_continues_from_first_date() {
        let h = history(&[1.0; 10]);
        let steps = RecursiveForecaster::default()
            .forecast_steps(&incrementing(), &h)
            .unwrap();
        let trends: Vec<i64> = steps.iter().map(|s| s.features.trend_index).collect();
        assert_eq!(trends, vec![10, 11, 12, 13, 14, 15, 16]);
    }
}
