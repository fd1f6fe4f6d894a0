//! Feature schema shared by training and inference.
//!
//! Every model input goes through [`Feature`]: a row is a named struct and a
//! model stores `(feature, coefficient)` pairs, so values are always looked up
//! by name rather than by position.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::models::ItemHistory;

/// Offset of the weekly lag.
pub const WEEKLY_LAG: usize = 7;
/// Short rolling window (one week of records).
pub const SHORT_WINDOW: usize = 7;
/// Long rolling window; rows without this many prior records are not featurised.
pub const LONG_WINDOW: usize = 28;

/// Model input columns, listed in canonical training order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    EnumCount,
    IntoStaticStr,
)]
pub enum Feature {
    #[serde(rename = "dow")]
    #[strum(serialize = "dow")]
    DayOfWeek,
    #[serde(rename = "month")]
    #[strum(serialize = "month")]
    Month,
    #[serde(rename = "trendIndex")]
    #[strum(serialize = "trendIndex")]
    TrendIndex,
    #[serde(rename = "isPromoDay")]
    #[strum(serialize = "isPromoDay")]
    IsPromoDay,
    #[serde(rename = "lag1")]
    #[strum(serialize = "lag1")]
    Lag1,
    #[serde(rename = "lag7")]
    #[strum(serialize = "lag7")]
    Lag7,
    #[serde(rename = "roll7")]
    #[strum(serialize = "roll7")]
    Roll7,
    #[serde(rename = "roll28")]
    #[strum(serialize = "roll28")]
    Roll28,
}

impl Feature {
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::DayOfWeek,
        Feature::Month,
        Feature::TrendIndex,
        Feature::IsPromoDay,
        Feature::Lag1,
        Feature::Lag7,
        Feature::Roll7,
        Feature::Roll28,
    ];

    /// Column name used in artifacts and exports.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Lag and rolling-window values derived from the units sold before a day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LagFeatures {
    pub lag1: f64,
    pub lag7: f64,
    pub roll7: f64,
    pub roll28: f64,
}

impl LagFeatures {
    /// Lags over a complete history window.
    ///
    /// `prior` holds the values strictly before the featurised day. Returns
    /// `None` unless at least [`LONG_WINDOW`] values are available, which is
    /// the point where every lag and rolling value is defined.
    pub fn from_full_window(prior: &[f64]) -> Option<Self> {
        if prior.len() < LONG_WINDOW {
            return None;
        }
        let n = prior.len();
        Some(Self {
            lag1: prior[n - 1],
            lag7: prior[n - WEEKLY_LAG],
            roll7: trailing_mean(prior, SHORT_WINDOW)?,
            roll28: trailing_mean(prior, LONG_WINDOW)?,
        })
    }

    /// Lags over a possibly short history.
    ///
    /// With fewer than seven values `lag7` falls back to `lag1`; rolling means
    /// shrink to whatever is available. Returns `None` only for an empty slice.
    pub fn with_fallback(prior: &[f64]) -> Option<Self> {
        let n = prior.len();
        let lag1 = *prior.last()?;
        let lag7 = if n >= WEEKLY_LAG {
            prior[n - WEEKLY_LAG]
        } else {
            lag1
        };
        Some(Self {
            lag1,
            lag7,
            roll7: trailing_mean(prior, SHORT_WINDOW)?,
            roll28: trailing_mean(prior, LONG_WINDOW)?,
        })
    }
}

/// Mean of the last `min(window, len)` values.
pub fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() || window == 0 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(window)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// One fully named model input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRow {
    /// Monday = 0 .. Sunday = 6
    pub dow: u32,
    pub month: u32,
    pub trend_index: i64,
    pub is_promo_day: bool,
    #[serde(flatten)]
    pub lags: LagFeatures,
}

impl FeatureRow {
    /// Calendar features for `date` relative to the item's first observed day.
    pub fn new(date: NaiveDate, first_date: NaiveDate, is_promo_day: bool, lags: LagFeatures) -> Self {
        Self {
            dow: date.weekday().num_days_from_monday(),
            month: date.month(),
            trend_index: (date - first_date).num_days(),
            is_promo_day,
            lags,
        }
    }

    /// Value of one column.
    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::DayOfWeek => f64::from(self.dow),
            Feature::Month => f64::from(self.month),
            Feature::TrendIndex => self.trend_index as f64,
            Feature::IsPromoDay => {
                if self.is_promo_day {
                    1.0
                } else {
                    0.0
                }
            }
            Feature::Lag1 => self.lags.lag1,
            Feature::Lag7 => self.lags.lag7,
            Feature::Roll7 => self.lags.roll7,
            Feature::Roll28 => self.lags.roll28,
        }
    }
}

/// A featurised historical day paired with its observed units.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub date: NaiveDate,
    pub features: FeatureRow,
    pub target: f64,
}

/// Builds one training row per record that has a full lag window.
///
/// The first [`LONG_WINDOW`] records of every item are dropped; a shorter
/// history yields an empty vector rather than an error.
pub fn build_features(history: &ItemHistory) -> Vec<TrainingRow> {
    let Some(first_date) = history.first_date() else {
        return Vec::new();
    };
    let units = history.units();

    history
        .records()
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let lags = LagFeatures::from_full_window(&units[..i])?;
            Some(TrainingRow {
                date: record.date,
                features: FeatureRow::new(record.date, first_date, record.is_promo_day, lags),
                target: record.units_sold,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SalesRecord;
    use strum::IntoEnumIterator;

    fn history(units: &[f64]) -> ItemHistory {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let records = units
            .iter()
            .enumerate()
            .map(|(i, u)| {
                SalesRecord::new(
                    start + chrono::Duration::days(i as i64),
                    "soup",
                    *u,
                    i % 10 == 0,
                )
            })
            .collect();
        ItemHistory::new("soup", records)
    }

    #[test]
    fn canonical_order_matches_enum_order() {
        let iterated: Vec<Feature> = Feature::iter().collect();
        assert_eq!(iterated, Feature::ALL.to_vec());
        let names: Vec<&str> = Feature::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec!["dow", "month", "trendIndex", "isPromoDay", "lag1", "lag7", "roll7", "roll28"]
        );
    }

    #[test]
    fn serde_names_match_column_names() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).unwrap();
            assert_eq!(json, format!("\"{}\"", feature.name()));
        }
    }

    #[test]
    fn short_history_produces_no_rows() {
        let units: Vec<f64> = (0..28).map(f64::from).collect();
        assert!(build_features(&history(&units)).is_empty());
        assert!(build_features(&history(&[])).is_empty());
    }

    #[test]
    fn first_row_starts_after_long_window() {
        let units: Vec<f64> = (0..30).map(f64::from).collect();
        let rows = build_features(&history(&units));
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.target, 28.0);
        assert_eq!(first.features.trend_index, 28);
        assert_eq!(first.features.lags.lag1, 27.0);
        assert_eq!(first.features.lags.lag7, 21.0);
        // mean(21..=27)
        assert_eq!(first.features.lags.roll7, 24.0);
        // mean(0..=27)
        assert_eq!(first.features.lags.roll28, 13.5);
    }

    #[test]
    fn calendar_fields_follow_the_date() {
        // 2024-02-05 is a Monday
        let date = NaiveDate::from_ymd_opt(2024, 2, 5).unwrap();
        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let lags = LagFeatures::with_fallback(&[3.0]).unwrap();
        let row = FeatureRow::new(date, first, true, lags);

        assert_eq!(row.dow, 0);
        assert_eq!(row.month, 2);
        assert_eq!(row.trend_index, 35);
        assert_eq!(row.get(Feature::IsPromoDay), 1.0);
    }

    #[test]
    fn trend_index_counts_calendar_days_across_gaps() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut records: Vec<SalesRecord> = (0..29)
            .map(|i| SalesRecord::new(start + chrono::Duration::days(i), "tea", 1.0, false))
            .collect();
        records.push(SalesRecord::new(start + chrono::Duration::days(40), "tea", 2.0, false));

        let rows = build_features(&ItemHistory::new("tea", records));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].features.trend_index, 40);
    }

    #[test]
    fn fallback_lags_degrade_for_short_history() {
        let lags = LagFeatures::with_fallback(&[4.0, 8.0]).unwrap();
        assert_eq!(lags.lag1, 8.0);
        assert_eq!(lags.lag7, 8.0);
        assert_eq!(lags.roll7, 6.0);
        assert_eq!(lags.roll28, 6.0);
        assert!(LagFeatures::with_fallback(&[]).is_none());
    }

    #[test]
    fn row_lookup_is_by_name() {
        let lags = LagFeatures {
            lag1: 1.0,
            lag7: 7.0,
            roll7: 70.0,
            roll28: 280.0,
        };
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let row = FeatureRow::new(date, date, false, lags);
        assert_eq!(row.get(Feature::Lag7), 7.0);
        assert_eq!(row.get(Feature::Roll28), 280.0);
        assert_eq!(row.get(Feature::Month), 6.0);
        assert_eq!(row.get(Feature::TrendIndex), 0.0);
    }
}
