use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::ml::ModelError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier echoed from the `x-request-id` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service account credentials not found at {0}")]
    MissingCredentials(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

impl From<csv::Error> for ServiceError {
    fn from(err: csv::Error) -> Self {
        ServiceError::BadRequest(format!("invalid sales CSV: {err}"))
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::ValidationError(_) | Self::NoData(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ExternalServiceError(_) | Self::UpstreamRejected(_) | Self::AuthError(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::MissingCredentials(_)
            | Self::Model(_)
            | Self::Io(_)
            | Self::SerializationError(_)
            | Self::ConfigError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::MissingCredentials(_) => {
                "Missing service account credentials on the server".to_string()
            }
            Self::NoData(msg) | Self::BadRequest(msg) => msg.clone(),
            Self::ExternalServiceError(_) | Self::UpstreamRejected(_) | Self::AuthError(_) => {
                "Upstream document store request failed".to_string()
            }
            Self::Model(_)
            | Self::Io(_)
            | Self::SerializationError(_)
            | Self::ConfigError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::ValidationError(_) => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rstest::rstest;

    #[tokio::test]
    async fn error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::BadRequest("uid is required".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.message, "uid is required");
        assert_eq!(payload.error, "Bad Request");
    }

    #[rstest]
    #[case(ServiceError::BadRequest("x".into()), StatusCode::BAD_REQUEST)]
    #[case(ServiceError::ValidationError("x".into()), StatusCode::BAD_REQUEST)]
    #[case(ServiceError::NoData("x".into()), StatusCode::BAD_REQUEST)]
    #[case(ServiceError::MissingCredentials("key.json".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(ServiceError::ExternalServiceError("x".into()), StatusCode::BAD_GATEWAY)]
    #[case(ServiceError::UpstreamRejected("x".into()), StatusCode::BAD_GATEWAY)]
    #[case(ServiceError::AuthError("x".into()), StatusCode::BAD_GATEWAY)]
    #[case(
        ServiceError::Model(ModelError::Fit("x".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    #[case(ServiceError::InternalError("x".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn status_code_mapping(#[case] error: ServiceError, #[case] expected: StatusCode) {
        assert_eq!(error.status_code(), expected);
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::MissingCredentials("/secret/path.json".into()).response_message(),
            "Missing service account credentials on the server"
        );
        assert_eq!(
            ServiceError::ExternalServiceError("token=abc".into()).response_message(),
            "Upstream document store request failed"
        );
        assert_eq!(
            ServiceError::Model(ModelError::Fit("singular".into())).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NoData("No salesDaily data found".into()).response_message(),
            "No salesDaily data found"
        );
    }
}
