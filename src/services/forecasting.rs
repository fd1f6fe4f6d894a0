use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::sink::{ForecastSink, WriteReport};
use crate::errors::ServiceError;
use crate::ml::{ModelTrainer, RecursiveForecaster, TrainingReport};
use crate::models::{group_by_item, ForecastDocument, ItemHistory, SalesRecord};
use crate::repositories::{ModelRepository, SalesRepository};

/// Response body of a completed training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingSummary {
    pub ok: bool,
    pub trained_models: usize,
    pub forecast_rows: usize,
    pub written: usize,
    pub failed_writes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingOutcome {
    Completed(TrainingSummary),
    /// The account has no sales to train on.
    NoData,
}

/// Load, train, forecast and write for one account at a time.
pub struct ForecastingService {
    sales: Arc<dyn SalesRepository>,
    models: Arc<dyn ModelRepository>,
    sink: ForecastSink,
    trainer: ModelTrainer,
    forecaster: RecursiveForecaster,
    account_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ForecastingService {
    pub fn new(
        sales: Arc<dyn SalesRepository>,
        models: Arc<dyn ModelRepository>,
        sink: ForecastSink,
        trainer: ModelTrainer,
        forecaster: RecursiveForecaster,
    ) -> Self {
        Self {
            sales,
            models,
            sink,
            trainer,
            forecaster,
            account_locks: DashMap::new(),
        }
    }

    fn account_lock<'a>(&'a self, uid: &'a str) -> AccountLock<'a> {
        let lock = self
            .account_locks
            .entry(uid.to_string())
            .or_default()
            .clone();
        AccountLock {
            locks: &self.account_locks,
            uid,
            lock,
        }
    }

    /// Full pipeline for `uid`. Runs for the same account are serialised.
    #[instrument(skip(self))]
    pub async fn run_training(&self, uid: &str) -> Result<TrainingOutcome, ServiceError> {
        let account = self.account_lock(uid);
        let _guard = account.lock.lock().await;

        let sales = self.sales.load_sales(uid).await?;
        if sales.is_empty() {
            info!("no sales data for account");
            return Ok(TrainingOutcome::NoData);
        }

        let histories = Arc::new(group_by_item(sales));
        let report = self.train_histories(uid, histories.clone()).await?;
        let documents = self.forecast_histories(uid, histories).await?;
        let written = self.write_forecasts(uid, &documents).await;

        let summary = TrainingSummary {
            ok: true,
            trained_models: report.trained(),
            forecast_rows: documents.len(),
            written: written.written,
            failed_writes: written.failed_writes,
        };
        info!(
            trained_models = summary.trained_models,
            skipped = report.skipped.len(),
            forecast_rows = summary.forecast_rows,
            written = summary.written,
            failed_writes = summary.failed_writes,
            "training run finished"
        );
        Ok(TrainingOutcome::Completed(summary))
    }

    /// Fits and stores one model per item with enough history.
    pub async fn train(
        &self,
        uid: &str,
        sales: Vec<SalesRecord>,
    ) -> Result<TrainingReport, ServiceError> {
        self.train_histories(uid, Arc::new(group_by_item(sales)))
            .await
    }

    /// Forecasts every item that has a stored model and a history in `sales`.
    pub async fn forecast_stored(
        &self,
        uid: &str,
        sales: Vec<SalesRecord>,
    ) -> Result<Vec<ForecastDocument>, ServiceError> {
        self.forecast_histories(uid, Arc::new(group_by_item(sales)))
            .await
    }

    pub async fn write_forecasts(&self, uid: &str, documents: &[ForecastDocument]) -> WriteReport {
        self.sink.write(uid, documents).await
    }

    async fn train_histories(
        &self,
        uid: &str,
        histories: Arc<BTreeMap<String, ItemHistory>>,
    ) -> Result<TrainingReport, ServiceError> {
        let trainer = self.trainer.clone();
        let models = self.models.clone();
        let uid = uid.to_string();

        tokio::task::spawn_blocking(move || {
            let report = trainer.train_all(&histories);
            for artifact in &report.artifacts {
                models.save(&uid, artifact)?;
            }
            Ok::<_, ServiceError>(report)
        })
        .await
        .map_err(|e| ServiceError::InternalError(format!("training task failed: {e}")))?
    }

    async fn forecast_histories(
        &self,
        uid: &str,
        histories: Arc<BTreeMap<String, ItemHistory>>,
    ) -> Result<Vec<ForecastDocument>, ServiceError> {
        let forecaster = self.forecaster.clone();
        let models = self.models.clone();
        let uid = uid.to_string();

        tokio::task::spawn_blocking(move || {
            forecast_all(&uid, models.as_ref(), &forecaster, &histories)
        })
        .await
        .map_err(|e| ServiceError::InternalError(format!("forecast task failed: {e}")))?
    }
}

/// Handle on one account's run lock.
///
/// Dropping the last handle removes the map entry, so the map only holds
/// accounts with a run in flight or waiting.
struct AccountLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    uid: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for AccountLock<'_> {
    fn drop(&mut self) {
        // one reference in the map, one here
        self.locks
            .remove_if(self.uid, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// Runs every stored model of `uid` against its item's history.
///
/// Items with no history, models that fail to load and forecasts that fail
/// are logged and left out.
fn forecast_all(
    uid: &str,
    models: &dyn ModelRepository,
    forecaster: &RecursiveForecaster,
    histories: &BTreeMap<String, ItemHistory>,
) -> Result<Vec<ForecastDocument>, ServiceError> {
    let mut documents = Vec::new();

    for item_id in models.list(uid)? {
        let Some(history) = histories.get(&item_id) else {
            warn!(item_id = %item_id, "stored model has no sales history, skipping");
            continue;
        };
        let artifact = match models.load(uid, &item_id) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => continue,
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "failed to load model, skipping");
                continue;
            }
        };

        match forecaster.forecast(&artifact, history) {
            Ok(rows) => documents.extend(
                rows.into_iter()
                    .map(|row| ForecastDocument::from_row(row, artifact.model_name.clone())),
            ),
            Err(e) => warn!(item_id = %item_id, error = %e, "forecast failed, skipping"),
        }
    }

    Ok(documents)
}
