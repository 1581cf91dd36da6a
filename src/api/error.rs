//! Structured API error responses with error codes
//!
//! Record and artisan endpoints answer errors as
//! `{ "error": { "code", "numeric_code", "message", ... } }`. The fraud
//! boundary keeps its own flat `{ "error": string }` body, see
//! [`FraudBoundaryError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::infra::ProvenanceError;

// ============================================================================
// Error Codes
// ============================================================================

/// Stable, machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (3xxx)
    InvalidRequestBody,
    InvalidFieldValue,
    /// Fraud evaluation without a record or GPS block
    MissingGpsData,

    // Resource errors (4xxx)
    ResourceNotFound,
    UnknownEndpoint,

    // State errors (7xxx)
    InvalidStateTransition,
    PlanLimitReached,

    // Infrastructure errors (8xxx)
    DatabaseError,
    StorageExhausted,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::InvalidRequestBody => 3001,
            ErrorCode::InvalidFieldValue => 3003,
            ErrorCode::MissingGpsData => 3010,

            ErrorCode::ResourceNotFound => 4001,
            ErrorCode::UnknownEndpoint => 4010,

            ErrorCode::InvalidStateTransition => 7001,
            ErrorCode::PlanLimitReached => 7010,

            ErrorCode::DatabaseError => 8001,
            ErrorCode::ServiceUnavailable => 8002,
            ErrorCode::StorageExhausted => 8010,
            ErrorCode::InternalError => 8999,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequestBody
            | ErrorCode::InvalidFieldValue
            | ErrorCode::MissingGpsData
            | ErrorCode::InvalidStateTransition => StatusCode::BAD_REQUEST,

            ErrorCode::ResourceNotFound | ErrorCode::UnknownEndpoint => StatusCode::NOT_FOUND,

            ErrorCode::PlanLimitReached => StatusCode::FORBIDDEN,

            ErrorCode::StorageExhausted => StatusCode::INSUFFICIENT_STORAGE,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::MissingGpsData => "MISSING_GPS_DATA",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::UnknownEndpoint => "UNKNOWN_ENDPOINT",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::PlanLimitReached => "PLAN_LIMIT_REACHED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::StorageExhausted => "STORAGE_EXHAUSTED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Related resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                resource_id: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

// ============================================================================
// Conversion from ProvenanceError
// ============================================================================

impl From<ProvenanceError> for ApiError {
    fn from(err: ProvenanceError) -> Self {
        match err {
            ProvenanceError::Database(e) => {
                ApiError::new(ErrorCode::DatabaseError, format!("Database error: {}", e))
            }
            ProvenanceError::StorageExhausted(msg) => ApiError::new(
                ErrorCode::StorageExhausted,
                format!("Storage exhausted: {}", msg),
            ),
            ProvenanceError::Serialization(e) => {
                ApiError::new(ErrorCode::InvalidRequestBody, e.to_string())
            }
            ProvenanceError::Delivery(msg) => ApiError::new(ErrorCode::ServiceUnavailable, msg),
            ProvenanceError::Migration(e) => {
                ApiError::new(ErrorCode::DatabaseError, format!("Migration error: {}", e))
            }
            ProvenanceError::ProductNotFound(id) => {
                ApiError::new(ErrorCode::ResourceNotFound, format!("Product not found: {}", id))
                    .with_resource_id(id)
            }
            ProvenanceError::InvalidStateTransition {
                product_id,
                from,
                to,
            } => ApiError::new(
                ErrorCode::InvalidStateTransition,
                format!(
                    "Invalid state transition for product {}: {} -> {}",
                    product_id, from, to
                ),
            )
            .with_details(serde_json::json!({
                "product_id": product_id,
                "from_state": from,
                "to_state": to
            })),
            ProvenanceError::PlanLimitReached { tier, limit } => ApiError::new(
                ErrorCode::PlanLimitReached,
                format!("{} plan allows {} products", tier, limit),
            )
            .with_details(serde_json::json!({ "tier": tier, "limit": limit })),
            ProvenanceError::MissingGps => {
                ApiError::new(ErrorCode::MissingGpsData, ProvenanceError::MissingGps.to_string())
            }
            ProvenanceError::Configuration(msg) => ApiError::new(
                ErrorCode::InternalError,
                format!("Configuration error: {}", msg),
            ),
            ProvenanceError::Internal(msg) => ApiError::new(ErrorCode::InternalError, msg),
        }
    }
}

/// `{ "error": string }` with HTTP 400, the fraud boundary contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudBoundaryError {
    pub error: String,
}

impl FraudBoundaryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

impl IntoResponse for FraudBoundaryError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

impl From<ProvenanceError> for FraudBoundaryError {
    fn from(err: ProvenanceError) -> Self {
        Self::new(err.to_string())
    }
}

/// Create a validation error with field details
pub fn validation_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidFieldValue, message.into())
        .with_details(serde_json::json!({ "field": field }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::MissingGpsData.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::UnknownEndpoint.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::StorageExhausted.http_status(),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(ErrorCode::InternalError.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_storage_exhaustion_maps_to_507() {
        let api: ApiError = ProvenanceError::StorageExhausted("disk full".into()).into();
        assert_eq!(api.status(), StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(api.error.numeric_code, 8010);
    }

    #[test]
    fn test_error_serialization() {
        let error = ApiError::from(ProvenanceError::ProductNotFound("p-1".into()));
        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["error"]["code"], "RESOURCE_NOT_FOUND");
        assert_eq!(json["error"]["numeric_code"], 4001);
        assert_eq!(json["error"]["resource_id"], "p-1");
    }

    #[test]
    fn test_fraud_boundary_body_is_flat() {
        let body = FraudBoundaryError::from(ProvenanceError::MissingGps);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Missing record or GPS data" }));
    }

    #[test]
    fn test_validation_error() {
        let error = validation_error("home_lat", "latitude out of range");
        assert_eq!(error.error.code, ErrorCode::InvalidFieldValue);
        assert_eq!(error.error.details.unwrap()["field"], "home_lat");
    }
}
