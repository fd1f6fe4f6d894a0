use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;
use crate::services::{TrainingOutcome, TrainingSummary};
use crate::AppState;

pub const NO_SALES_MESSAGE: &str = "No salesDaily data found in Firestore for this user.";

fn validate_uid(uid: &str) -> Result<(), ValidationError> {
    if uid.trim().is_empty() {
        return Err(ValidationError::new("blank_uid"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct TrainRequest {
    #[serde(default)]
    #[validate(custom = "validate_uid")]
    pub uid: String,
}

/// `POST /train`: retrain every item of one account and publish a fresh
/// week of forecasts.
///
/// A missing or malformed body is treated as a request without a uid.
#[instrument(skip_all)]
pub async fn train(
    State(state): State<AppState>,
    payload: Option<Json<TrainRequest>>,
) -> Result<Json<TrainingSummary>, ServiceError> {
    if let Some(path) = &state.credentials_path {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ServiceError::MissingCredentials(path.display().to_string()));
        }
    }

    let request = payload.map(|Json(body)| body).unwrap_or_default();
    request
        .validate()
        .map_err(|_| ServiceError::BadRequest("uid is required".to_string()))?;
    let uid = request.uid.trim();

    info!(uid, "training requested");
    match state.service.run_training(uid).await? {
        TrainingOutcome::Completed(summary) => Ok(Json(summary)),
        TrainingOutcome::NoData => Err(ServiceError::NoData(NO_SALES_MESSAGE.to_string())),
    }
}

pub fn training_routes() -> Router<AppState> {
    Router::new().route("/train", post(train))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_uid_fails_validation() {
        assert!(TrainRequest { uid: "  ".into() }.validate().is_err());
        assert!(TrainRequest::default().validate().is_err());
        assert!(TrainRequest { uid: "abc".into() }.validate().is_ok());
    }

    #[test]
    fn missing_uid_field_deserialises_to_empty() {
        let request: TrainRequest = serde_json::from_str("{}").unwrap();
        assert!(request.uid.is_empty());
    }
}
