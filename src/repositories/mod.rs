//! Storage seams: where sales come from, where forecasts go, and where
//! per-item models are kept.

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::ml::ModelArtifact;
use crate::models::{ForecastDocument, SalesRecord};

pub mod csv_source;
pub mod firestore;
pub mod json_sink;
pub mod memory;
pub mod model_store;

pub use csv_source::CsvSalesSource;
pub use firestore::{FirestoreClient, FirestoreCredentials};
pub use json_sink::JsonForecastFile;
pub use memory::{InMemoryForecastRepository, InMemorySalesRepository};
pub use model_store::{FileModelStore, InMemoryModelStore};

/// Source of daily sales records for an account.
#[async_trait]
pub trait SalesRepository: Send + Sync {
    /// All sales records of `uid`, in no particular order. Records without a
    /// usable date or item id are already dropped.
    async fn load_sales(&self, uid: &str) -> Result<Vec<SalesRecord>, ServiceError>;
}

/// Destination for forecast documents.
#[async_trait]
pub trait ForecastRepository: Send + Sync {
    /// Checks that `document` can be stored at all. Rejected documents are
    /// kept out of batches so they cannot fail their neighbours.
    fn accepts(&self, _document: &ForecastDocument) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Writes one batch. A document whose id already exists is replaced.
    async fn commit_batch(
        &self,
        uid: &str,
        documents: &[ForecastDocument],
    ) -> Result<(), ServiceError>;
}

/// Per-account, per-item model artifacts.
///
/// Calls are synchronous; the forecasting service only uses a model store
/// from a blocking task.
pub trait ModelRepository: Send + Sync {
    /// Stores `artifact`, replacing any earlier model for the same item.
    fn save(&self, uid: &str, artifact: &ModelArtifact) -> Result<(), ServiceError>;

    fn load(&self, uid: &str, item_id: &str) -> Result<Option<ModelArtifact>, ServiceError>;

    /// Item ids with a stored model, sorted.
    fn list(&self, uid: &str) -> Result<Vec<String>, ServiceError>;
}
