//! Firestore over its REST API.
//!
//! Sales are read from `users/{uid}/salesDaily` one page at a time; forecasts
//! are written to `users/{uid}/forecasts/{date}_{itemId}` with a single
//! `documents:commit` call per batch, `generatedAt` being set to the commit
//! time by the server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::{ForecastRepository, SalesRepository};
use crate::auth::{ServiceAccountKey, TokenProvider};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{parse_sales_date, ForecastDocument, SalesRecord};

const USERS_COLLECTION: &str = "users";
const SALES_COLLECTION: &str = "salesDaily";
const FORECASTS_COLLECTION: &str = "forecasts";
const LIST_PAGE_SIZE: u32 = 300;
/// Firestore rejects commits with more writes than this.
pub const MAX_WRITES_PER_COMMIT: usize = 500;
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bearer token the emulator accepts in place of real credentials.
const EMULATOR_TOKEN: &str = "owner";

/// How requests are authenticated.
#[derive(Debug, Clone)]
pub enum FirestoreCredentials {
    /// Local emulator, no real authentication.
    Emulator,
    /// Service account key file, read on first use.
    ServiceAccount(PathBuf),
}

#[derive(Debug)]
pub struct FirestoreClient {
    http: Client,
    base_url: String,
    database: String,
    project_override: Option<String>,
    credentials: FirestoreCredentials,
    token_provider: OnceCell<TokenProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    name: String,
    #[serde(default)]
    fields: HashMap<String, JsonValue>,
}

impl FirestoreClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        database: impl Into<String>,
        project_override: Option<String>,
        credentials: FirestoreCredentials,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            project_override,
            credentials,
            token_provider: OnceCell::new(),
        }
    }

    /// Builds a client from configuration; the emulator host wins over the base URL.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(config.store_timeout())
            .connect_timeout(config.store_timeout().min(MAX_CONNECT_TIMEOUT))
            .build()
            .map_err(|e| ServiceError::ConfigError(format!("HTTP client: {e}")))?;

        let (base_url, credentials) = match &config.firestore_emulator_host {
            Some(host) => (format!("http://{host}/v1"), FirestoreCredentials::Emulator),
            None => (
                config.firestore_base_url.clone(),
                FirestoreCredentials::ServiceAccount(config.credentials_path.clone()),
            ),
        };

        Ok(Self::new(
            http,
            base_url,
            config.firestore_database.clone(),
            config.firestore_project_id.clone(),
            credentials,
        ))
    }

    /// Key file that must exist before the client can be used, if any.
    pub fn credentials_path(&self) -> Option<&Path> {
        match &self.credentials {
            FirestoreCredentials::ServiceAccount(path) => Some(path),
            FirestoreCredentials::Emulator => None,
        }
    }

    async fn token_provider(&self, path: &Path) -> Result<&TokenProvider, ServiceError> {
        self.token_provider
            .get_or_try_init(|| async {
                let key = ServiceAccountKey::from_file(path)?;
                info!(project_id = %key.project_id, client_email = %key.client_email, "loaded service account");
                Ok::<_, ServiceError>(TokenProvider::new(key, self.http.clone())?)
            })
            .await
    }

    async fn project_id(&self) -> Result<String, ServiceError> {
        if let Some(project) = &self.project_override {
            return Ok(project.clone());
        }
        match &self.credentials {
            FirestoreCredentials::ServiceAccount(path) => {
                Ok(self.token_provider(path).await?.project_id().to_string())
            }
            FirestoreCredentials::Emulator => Err(ServiceError::ConfigError(
                "firestore_project_id is required with the emulator".to_string(),
            )),
        }
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ServiceError> {
        match &self.credentials {
            FirestoreCredentials::Emulator => Ok(request.bearer_auth(EMULATOR_TOKEN)),
            FirestoreCredentials::ServiceAccount(path) => {
                let token = self.token_provider(path).await?.access_token().await?;
                Ok(request.bearer_auth(token))
            }
        }
    }

    fn database_url(&self, project: &str, tail: &[&str]) -> Result<Url, ServiceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ServiceError::ConfigError(format!("firestore_base_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ServiceError::ConfigError("firestore_base_url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["projects", project, "databases", self.database.as_str()])
            .extend(tail);
        Ok(url)
    }

    fn document_root(&self, project: &str) -> String {
        format!("projects/{project}/databases/{}/documents", self.database)
    }

    async fn list_page(
        &self,
        project: &str,
        uid: &str,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse, ServiceError> {
        let mut url = self.database_url(
            project,
            &["documents", USERS_COLLECTION, uid, SALES_COLLECTION],
        )?;
        url.query_pairs_mut()
            .append_pair("pageSize", &LIST_PAGE_SIZE.to_string());
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }

        let request = self.authorize(self.http.get(url)).await?;
        let response = check_status(request.send().await?, "list salesDaily").await?;
        Ok(response.json().await?)
    }
}

/// Firestore document ids cannot contain `/`, be `.` or `..`, or look like `__name__`.
fn validate_document_id(kind: &str, id: &str) -> Result<(), ServiceError> {
    let reserved = id.len() > 4 && id.starts_with("__") && id.ends_with("__");
    if id.is_empty() || id == "." || id == ".." || id.contains('/') || reserved {
        return Err(ServiceError::BadRequest(format!(
            "{kind} {id:?} is not a valid document id"
        )));
    }
    Ok(())
}

async fn check_status(response: Response, operation: &str) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{operation} returned {status}: {body}");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::AuthError(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ServiceError::ExternalServiceError(message)
        }
        s if s.is_server_error() => ServiceError::ExternalServiceError(message),
        _ => ServiceError::UpstreamRejected(message),
    })
}

fn typed<'a>(fields: &'a HashMap<String, JsonValue>, key: &str, kind: &str) -> Option<&'a JsonValue> {
    fields.get(key)?.get(kind)
}

fn string_field(fields: &HashMap<String, JsonValue>, key: &str) -> Option<String> {
    ["stringValue", "timestampValue", "integerValue"]
        .iter()
        .find_map(|kind| typed(fields, key, kind)?.as_str().map(str::to_string))
        .or_else(|| typed(fields, key, "doubleValue").map(|v| v.to_string()))
}

fn number_field(fields: &HashMap<String, JsonValue>, key: &str) -> Option<f64> {
    ["integerValue", "doubleValue", "stringValue"]
        .iter()
        .find_map(|kind| {
            let value = typed(fields, key, kind)?;
            value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        })
}

fn bool_field(fields: &HashMap<String, JsonValue>, key: &str) -> Option<bool> {
    if let Some(flag) = typed(fields, key, "booleanValue").and_then(JsonValue::as_bool) {
        return Some(flag);
    }
    if let Some(n) = number_field(fields, key) {
        return Some(n != 0.0);
    }
    typed(fields, key, "stringValue")
        .and_then(JsonValue::as_str)
        .map(|s| s.trim().eq_ignore_ascii_case("true"))
}

/// Turns a `salesDaily` document into a record, or `None` when it has no
/// item id or no parseable date.
fn decode_sales_document(fields: &HashMap<String, JsonValue>) -> Option<SalesRecord> {
    let item_id = string_field(fields, "menuItemId").filter(|id| !id.trim().is_empty())?;
    let date = parse_sales_date(&string_field(fields, "date")?)?;
    let units_sold = number_field(fields, "unitsSold").unwrap_or(0.0);
    let is_promo_day = bool_field(fields, "isPromoDay").unwrap_or(false);
    Some(SalesRecord::new(date, item_id, units_sold, is_promo_day))
}

fn encode_forecast_write(document_root: &str, uid: &str, document: &ForecastDocument) -> JsonValue {
    let row = &document.row;
    json!({
        "update": {
            "name": format!("{document_root}/{USERS_COLLECTION}/{uid}/{FORECASTS_COLLECTION}/{}", document.id),
            "fields": {
                "date": { "stringValue": row.date.format("%Y-%m-%d").to_string() },
                "menuItemId": { "stringValue": row.item_id },
                "predictedUnits": { "integerValue": row.predicted_units.to_string() },
                "model": { "stringValue": document.model },
            }
        },
        "updateTransforms": [
            { "fieldPath": "generatedAt", "setToServerValue": "REQUEST_TIME" }
        ]
    })
}

#[async_trait]
impl SalesRepository for FirestoreClient {
    #[instrument(skip(self))]
    async fn load_sales(&self, uid: &str) -> Result<Vec<SalesRecord>, ServiceError> {
        validate_document_id("uid", uid)?;
        let project = self.project_id().await?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(&project, uid, page_token.as_deref()).await?;
            for document in &page.documents {
                match decode_sales_document(&document.fields) {
                    Some(record) => records.push(record),
                    None => {
                        skipped += 1;
                        debug!(document = %document.name, "skipping sales document");
                    }
                }
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(records = records.len(), skipped, "loaded sales from Firestore");
        Ok(records)
    }
}

#[async_trait]
impl ForecastRepository for FirestoreClient {
    fn accepts(&self, document: &ForecastDocument) -> Result<(), ServiceError> {
        validate_document_id("forecast id", &document.id)
    }

    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    async fn commit_batch(
        &self,
        uid: &str,
        documents: &[ForecastDocument],
    ) -> Result<(), ServiceError> {
        if documents.is_empty() {
            return Ok(());
        }
        if documents.len() > MAX_WRITES_PER_COMMIT {
            return Err(ServiceError::BadRequest(format!(
                "{} writes exceed the commit limit of {MAX_WRITES_PER_COMMIT}",
                documents.len()
            )));
        }
        validate_document_id("uid", uid)?;
        for document in documents {
            validate_document_id("forecast id", &document.id)?;
        }

        let project = self.project_id().await?;
        let root = self.document_root(&project);
        let writes: Vec<JsonValue> = documents
            .iter()
            .map(|document| encode_forecast_write(&root, uid, document))
            .collect();

        let mut url = self.database_url(&project, &[])?;
        url.path_segments_mut()
            .map_err(|_| ServiceError::ConfigError("firestore_base_url cannot be a base".into()))?
            .push("documents:commit");

        let request = self
            .authorize(self.http.post(url).json(&json!({ "writes": writes })))
            .await?;
        check_status(request.send().await?, "commit forecasts").await?;
        debug!("committed forecast batch");
        Ok(())
    }
}
