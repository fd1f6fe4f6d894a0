use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::middleware_helpers::retry::{with_retry, RetryConfig, StoreRetryPolicy};
use crate::models::ForecastDocument;
use crate::repositories::firestore::MAX_WRITES_PER_COMMIT;
use crate::repositories::ForecastRepository;

/// Forecast documents per commit, kept below the store's hard limit.
pub const FIRESTORE_BATCH_LIMIT: usize = 450;

/// Outcome of writing one set of forecasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub written: usize,
    /// Rows not written, including rejected ones.
    pub failed_writes: usize,
    /// Rows the repository refused before any commit.
    pub rejected: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

/// Chunked, retried writer in front of a [`ForecastRepository`].
#[derive(Clone)]
pub struct ForecastSink {
    repository: Arc<dyn ForecastRepository>,
    batch_size: usize,
    retry: RetryConfig,
}

impl ForecastSink {
    pub fn new(
        repository: Arc<dyn ForecastRepository>,
        batch_size: usize,
        retry: RetryConfig,
    ) -> Result<Self, ServiceError> {
        if batch_size == 0 || batch_size > MAX_WRITES_PER_COMMIT {
            return Err(ServiceError::ValidationError(format!(
                "batch size must be between 1 and {MAX_WRITES_PER_COMMIT}, got {batch_size}"
            )));
        }
        Ok(Self {
            repository,
            batch_size,
            retry,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes `documents` in order, one commit per chunk.
    ///
    /// Documents the repository refuses are dropped one by one before
    /// chunking. A chunk that still fails after its retries is counted as
    /// failed and the remaining chunks are still attempted.
    pub async fn write(&self, uid: &str, documents: &[ForecastDocument]) -> WriteReport {
        let mut report = WriteReport::default();

        let mut accepted = Vec::with_capacity(documents.len());
        for document in documents {
            match self.repository.accepts(document) {
                Ok(()) => accepted.push(document.clone()),
                Err(e) => {
                    warn!(uid, document_id = %document.id, error = %e, "forecast row rejected");
                    report.rejected += 1;
                    report.failed_writes += 1;
                }
            }
        }

        for (index, chunk) in accepted.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            let result = with_retry(&self.retry, StoreRetryPolicy, || {
                self.repository.commit_batch(uid, chunk)
            })
            .await;

            match result {
                Ok(()) => report.written += chunk.len(),
                Err(e) => {
                    warn!(uid, batch = index, size = chunk.len(), error = %e, "forecast batch not written");
                    report.failed_batches += 1;
                    report.failed_writes += chunk.len();
                }
            }
        }

        info!(
            uid,
            written = report.written,
            failed = report.failed_writes,
            rejected = report.rejected,
            batches = report.batches,
            "forecast write finished"
        );
        report
    }
}
