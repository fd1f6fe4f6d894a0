use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::SalesRepository;
use crate::errors::ServiceError;
use crate::models::{parse_sales_date, SalesRecord};

/// One CSV row as exported; every column is optional so bad rows can be skipped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsvSalesRow {
    date: Option<String>,
    menu_item_id: Option<String>,
    units_sold: Option<f64>,
    is_promo_day: Option<String>,
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "t"
    )
}

impl CsvSalesRow {
    fn into_record(self) -> Option<SalesRecord> {
        let item_id = self.menu_item_id.filter(|id| !id.trim().is_empty())?;
        let date = parse_sales_date(self.date.as_deref()?)?;
        Some(SalesRecord::new(
            date,
            item_id,
            self.units_sold.unwrap_or(0.0),
            self.is_promo_day.as_deref().map(parse_flag).unwrap_or(false),
        ))
    }
}

/// Parses a sales export with `date,menuItemId,unitsSold,isPromoDay` columns.
///
/// Extra columns are ignored. Rows without an item id or a parseable date are
/// skipped; a missing `unitsSold` counts as zero.
pub fn parse_sales_csv(bytes: &[u8]) -> Result<Vec<SalesRecord>, ServiceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<CsvSalesRow>() {
        match row?.into_record() {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "dropped CSV rows without item id or date");
    }
    Ok(records)
}

/// A single local CSV export used as the sales source for every account.
#[derive(Debug, Clone)]
pub struct CsvSalesSource {
    path: PathBuf,
}

impl CsvSalesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SalesRepository for CsvSalesSource {
    async fn load_sales(&self, _uid: &str) -> Result<Vec<SalesRecord>, ServiceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let records = parse_sales_csv(&bytes)?;
        info!(path = %self.path.display(), records = records.len(), "loaded sales CSV");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_rows_and_applies_defaults() {
        let csv = "\
date,menuItemId,menuItemName,unitsSold,isPromoDay
2024-01-01,burger,Burger,12,False
2024-01-02,burger,Burger,,True
2024-01-03,,Mystery,4,0
not-a-date,burger,Burger,5,0
2024-01-04T00:00:00Z,fries,Fries,7.5,1
";
        let records = parse_sales_csv(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].item_id, "burger");
        assert_eq!(records[0].units_sold, 12.0);
        assert!(!records[0].is_promo_day);

        assert_eq!(records[1].units_sold, 0.0);
        assert!(records[1].is_promo_day);

        assert_eq!(records[2].date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(records[2].units_sold, 7.5);
        assert!(records[2].is_promo_day);
    }

    #[test]
    fn non_numeric_units_is_an_error() {
        let csv = "date,menuItemId,unitsSold,isPromoDay\n2024-01-01,tea,lots,0\n";
        assert!(matches!(
            parse_sales_csv(csv.as_bytes()),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let source = CsvSalesSource::new("/nonexistent/sales.csv");
        assert!(matches!(
            source.load_sales("any").await,
            Err(ServiceError::Io(_))
        ));
    }
}
