use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::ForecastRepository;
use crate::errors::ServiceError;
use crate::models::{ForecastDocument, ForecastRow};

/// Writes forecasts to a local JSON file shaped `{itemId: [rows]}`.
///
/// Every commit rewrites the whole file with everything committed so far,
/// rows keyed by document id so a rerun for the same day replaces the row.
#[derive(Debug)]
pub struct JsonForecastFile {
    path: PathBuf,
    documents: Mutex<BTreeMap<String, ForecastDocument>>,
}

impl JsonForecastFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            documents: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn group_rows(documents: &BTreeMap<String, ForecastDocument>) -> BTreeMap<&str, Vec<&ForecastRow>> {
    let mut grouped: BTreeMap<&str, Vec<&ForecastRow>> = BTreeMap::new();
    for document in documents.values() {
        grouped
            .entry(document.row.item_id.as_str())
            .or_default()
            .push(&document.row);
    }
    for rows in grouped.values_mut() {
        rows.sort_by_key(|row| row.date);
    }
    grouped
}

#[async_trait]
impl ForecastRepository for JsonForecastFile {
    async fn commit_batch(
        &self,
        _uid: &str,
        documents: &[ForecastDocument],
    ) -> Result<(), ServiceError> {
        let mut stored = self.documents.lock().await;
        for document in documents {
            stored.insert(document.id.clone(), document.clone());
        }

        let json = serde_json::to_vec_pretty(&group_rows(&stored))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;

        debug!(path = %self.path.display(), rows = stored.len(), "wrote forecast file");
        Ok(())
    }
}
