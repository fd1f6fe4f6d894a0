use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single day-ahead prediction for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRow {
    pub date: NaiveDate,
    #[serde(rename = "menuItemId")]
    pub item_id: String,
    pub predicted_units: u32,
}

impl ForecastRow {
    /// Deterministic store key `{date}_{item_id}`; rewriting a row for the
    /// same day and item replaces the earlier document.
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.date.format("%Y-%m-%d"), self.item_id)
    }
}

/// A forecast row as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastDocument {
    #[serde(skip)]
    pub id: String,
    #[serde(flatten)]
    pub row: ForecastRow,
    pub generated_at: DateTime<Utc>,
    pub model: String,
}

impl ForecastDocument {
    pub fn from_row(row: ForecastRow, model: impl Into<String>) -> Self {
        Self {
            id: row.document_id(),
            row,
            generated_at: Utc::now(),
            model: model.into(),
        }
    }
}
