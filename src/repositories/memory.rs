use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ForecastRepository, SalesRepository};
use crate::errors::ServiceError;
use crate::models::{ForecastDocument, SalesRecord};

/// Sales held in memory, keyed by account.
#[derive(Debug, Default)]
pub struct InMemorySalesRepository {
    sales: DashMap<String, Vec<SalesRecord>>,
}

impl InMemorySalesRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sales(self, uid: impl Into<String>, records: Vec<SalesRecord>) -> Self {
        self.insert(uid, records);
        self
    }

    pub fn insert(&self, uid: impl Into<String>, records: Vec<SalesRecord>) {
        self.sales.entry(uid.into()).or_default().extend(records);
    }
}

#[async_trait]
impl SalesRepository for InMemorySalesRepository {
    async fn load_sales(&self, uid: &str) -> Result<Vec<SalesRecord>, ServiceError> {
        Ok(self
            .sales
            .get(uid)
            .map(|records| records.clone())
            .unwrap_or_default())
    }
}

/// Forecast documents held in memory, keyed by account and document id.
///
/// Remembers the size of every commit and can be told to fail the next
/// commits, which is what the sink tests need.
#[derive(Debug, Default)]
pub struct InMemoryForecastRepository {
    documents: DashMap<String, BTreeMap<String, ForecastDocument>>,
    commit_sizes: Mutex<Vec<usize>>,
    failures_remaining: AtomicUsize,
}

impl InMemoryForecastRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` commits fail with a transient error.
    pub fn fail_next_commits(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn documents(&self, uid: &str) -> Vec<ForecastDocument> {
        self.documents
            .get(uid)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sizes of the successful commits, in order.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.commit_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ForecastRepository for InMemoryForecastRepository {
    async fn commit_batch(
        &self,
        uid: &str,
        documents: &[ForecastDocument],
    ) -> Result<(), ServiceError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ServiceError::ExternalServiceError(
                "simulated commit failure".to_string(),
            ));
        }

        let mut stored = self.documents.entry(uid.to_string()).or_default();
        for document in documents {
            stored.insert(document.id.clone(), document.clone());
        }
        drop(stored);

        self.commit_sizes
            .lock()
            .map_err(|_| ServiceError::InternalError("commit log poisoned".to_string()))?
            .push(documents.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ForecastRow;
    use chrono::NaiveDate;

    fn doc(day: u32, item: &str, units: u32) -> ForecastDocument {
        ForecastDocument::from_row(
            ForecastRow {
                date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                item_id: item.into(),
                predicted_units: units,
            },
            "ridge_regression",
        )
    }

    #[tokio::test]
    async fn same_document_id_is_replaced() {
        let repo = InMemoryForecastRepository::new();
        repo.commit_batch("u1", &[doc(1, "tea", 3)]).await.unwrap();
        repo.commit_batch("u1", &[doc(1, "tea", 5), doc(2, "tea", 6)])
            .await
            .unwrap();

        let docs = repo.documents("u1");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].row.predicted_units, 5);
        assert_eq!(repo.commit_sizes(), vec![1, 2]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let repo = InMemoryForecastRepository::new();
        repo.fail_next_commits(1);
        assert!(repo.commit_batch("u1", &[doc(1, "tea", 3)]).await.is_err());
        assert!(repo.commit_batch("u1", &[doc(1, "tea", 3)]).await.is_ok());
    }

    #[tokio::test]
    async fn sales_are_scoped_by_account() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let repo = InMemorySalesRepository::new()
            .with_sales("u1", vec![SalesRecord::new(date, "tea", 2.0, false)]);
        assert_eq!(repo.load_sales("u1").await.unwrap().len(), 1);
        assert!(repo.load_sales("u2").await.unwrap().is_empty());
    }
}
