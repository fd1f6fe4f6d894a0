use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One day of sales for one menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRecord {
    pub date: NaiveDate,
    #[serde(rename = "menuItemId")]
    pub item_id: String,
    pub units_sold: f64,
    #[serde(default)]
    pub is_promo_day: bool,
}

impl SalesRecord {
    pub fn new(
        date: NaiveDate,
        item_id: impl Into<String>,
        units_sold: f64,
        is_promo_day: bool,
    ) -> Self {
        Self {
            date,
            item_id: item_id.into(),
            units_sold,
            is_promo_day,
        }
    }
}

/// Date-ordered sales history for a single item.
///
/// Records are sorted on construction with a stable sort, so records sharing a
/// date keep the order the source returned them in.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemHistory {
    item_id: String,
    records: Vec<SalesRecord>,
}

impl ItemHistory {
    pub fn new(item_id: impl Into<String>, mut records: Vec<SalesRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        Self {
            item_id: item_id.into(),
            records,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn records(&self) -> &[SalesRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Units sold in date order.
    pub fn units(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.units_sold).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }
}

/// Splits a flat record list into per-item histories keyed by item id.
pub fn group_by_item<I>(records: I) -> BTreeMap<String, ItemHistory>
where
    I: IntoIterator<Item = SalesRecord>,
{
    let mut grouped: BTreeMap<String, Vec<SalesRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.item_id.clone())
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|(item_id, records)| {
            let history = ItemHistory::new(item_id.clone(), records);
            (item_id, history)
        })
        .collect()
}

/// Parses a sales date written either as `YYYY-MM-DD` or as an RFC 3339 timestamp.
pub fn parse_sales_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.date_naive())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn parses_plain_and_timestamp_dates() {
        assert_eq!(parse_sales_date("2024-03-07"), Some(day(7)));
        assert_eq!(parse_sales_date(" 2024-03-07 "), Some(day(7)));
        assert_eq!(parse_sales_date("2024-03-07T00:00:00Z"), Some(day(7)));
        assert_eq!(parse_sales_date("07/03/2024"), None);
        assert_eq!(parse_sales_date(""), None);
    }

    #[test]
    fn grouping_sorts_each_item_by_date() {
        let records = vec![
            SalesRecord::new(day(3), "burger", 4.0, false),
            SalesRecord::new(day(1), "fries", 7.0, false),
            SalesRecord::new(day(1), "burger", 2.0, true),
            SalesRecord::new(day(2), "burger", 3.0, false),
        ];

        let grouped = group_by_item(records);
        assert_eq!(grouped.len(), 2);

        let burger = &grouped["burger"];
        assert_eq!(burger.units(), vec![2.0, 3.0, 4.0]);
        assert_eq!(burger.first_date(), Some(day(1)));
        assert_eq!(burger.last_date(), Some(day(3)));
        assert_eq!(grouped["fries"].len(), 1);
    }

    #[test]
    fn empty_history_has_no_dates() {
        let history = ItemHistory::new("latte", vec![]);
        assert!(history.is_empty());
        assert_eq!(history.first_date(), None);
        assert_eq!(history.last_date(), None);
    }

    #[test]
    fn deserializes_source_field_names() {
        let json = r#"{"date":"2024-03-01","menuItemId":"burger","unitsSold":12.5,"isPromoDay":true}"#;
        let record: SalesRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.item_id, "burger");
        assert_eq!(record.units_sold, 12.5);
        assert!(record.is_promo_day);
    }
}
