use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn};

use super::ModelRepository;
use crate::errors::ServiceError;
use crate::ml::{ModelArtifact, ModelError};

const ARTIFACT_EXTENSION: &str = "json";

/// Escapes everything except ASCII letters, digits, `-` and `_`.
///
/// The mapping is reversible, so distinct ids never share a file and ids
/// such as `..` or `a/b` cannot leave the store directory.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

fn encode_component(id: &str) -> String {
    utf8_percent_encode(id, COMPONENT).to_string()
}

/// Only names `encode_component` could have produced are accepted.
fn decode_component(encoded: &str) -> Option<String> {
    let decoded = percent_decode_str(encoded).decode_utf8().ok()?.into_owned();
    (encode_component(&decoded) == encoded).then_some(decoded)
}

/// One JSON file per item under `{root}/{uid}/`.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    root: PathBuf,
}

impl FileModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn account_dir(&self, uid: &str) -> PathBuf {
        self.root.join(encode_component(uid))
    }

    fn artifact_path(&self, uid: &str, item_id: &str) -> PathBuf {
        self.account_dir(uid)
            .join(format!("{}.{ARTIFACT_EXTENSION}", encode_component(item_id)))
    }
}

impl ModelRepository for FileModelStore {
    fn save(&self, uid: &str, artifact: &ModelArtifact) -> Result<(), ServiceError> {
        let dir = self.account_dir(uid);
        fs::create_dir_all(&dir)?;

        let path = self.artifact_path(uid, &artifact.item_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(artifact)?)?;
        fs::rename(&tmp, &path)?;

        debug!(uid, item_id = %artifact.item_id, path = %path.display(), "saved model");
        Ok(())
    }

    fn load(&self, uid: &str, item_id: &str) -> Result<Option<ModelArtifact>, ServiceError> {
        let path = self.artifact_path(uid, item_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let artifact = ModelArtifact::from_json(&bytes)?;
        if artifact.item_id != item_id {
            return Err(ModelError::FeatureMismatch(format!(
                "{} holds a model for {}",
                path.display(),
                artifact.item_id
            ))
            .into());
        }
        Ok(Some(artifact))
    }

    fn list(&self, uid: &str) -> Result<Vec<String>, ServiceError> {
        let entries = match fs::read_dir(self.account_dir(uid)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_component(stem) {
                Some(item_id) => items.push(item_id),
                None => warn!(path = %path.display(), "ignoring unrecognised model file"),
            }
        }
        items.sort();
        Ok(items)
    }
}

/// Model store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    models: DashMap<String, BTreeMap<String, ModelArtifact>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelRepository for InMemoryModelStore {
    fn save(&self, uid: &str, artifact: &ModelArtifact) -> Result<(), ServiceError> {
        self.models
            .entry(uid.to_string())
            .or_default()
            .insert(artifact.item_id.clone(), artifact.clone());
        Ok(())
    }

    fn load(&self, uid: &str, item_id: &str) -> Result<Option<ModelArtifact>, ServiceError> {
        Ok(self
            .models
            .get(uid)
            .and_then(|items| items.get(item_id).cloned()))
    }

    fn list(&self, uid: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .models
            .get(uid)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default())
    }
}
