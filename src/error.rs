// Error types for the pricing engine
// Calculation failures propagate to the caller; audit and statistics failures never do

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// Main error type for the pricing engine
///
/// `Validation` and `NotFound` are the caller-facing kinds: they abort a
/// calculation before anything is computed or persisted.
#[derive(Debug, Error)]
pub enum PricingError {
    /// Malformed or out-of-range input, or a rule whose shape cannot be evaluated
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unresolvable package or entity reference
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// History persistence failed
    /// Only ever logged by the recorder, never returned from a calculation
    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON (rule conditions, input snapshots) could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Engine configuration that cannot be used
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Result type alias for pricing operations
pub type PricingResult<T> = Result<T, PricingError>;

impl PricingError {
    pub fn validation(message: impl Into<String>) -> Self {
        PricingError::Validation(message.into())
    }

    pub fn package_not_found(package_id: i32) -> Self {
        PricingError::NotFound {
            entity: "Package",
            id: package_id.to_string(),
        }
    }

    /// Whether the error was caused by the caller's request
    pub fn is_client_error(&self) -> bool {
        matches!(self, PricingError::Validation(_) | PricingError::NotFound { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PricingError::Validation(_) => StatusCode::BAD_REQUEST,
            PricingError::NotFound { .. } => StatusCode::NOT_FOUND,
            PricingError::AuditWrite(_)
            | PricingError::Database(_)
            | PricingError::Json(_)
            | PricingError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            PricingError::Validation(_) => "VALIDATION_ERROR",
            PricingError::NotFound { .. } => "NOT_FOUND",
            PricingError::AuditWrite(_) => "AUDIT_WRITE_ERROR",
            PricingError::Database(_) => "DATABASE_ERROR",
            PricingError::Json(_) => "JSON_ERROR",
            PricingError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for PricingError {
    fn from(err: validator::ValidationErrors) -> Self {
        PricingError::Validation(err.to_string())
    }
}

impl IntoResponse for PricingError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs
        let message = if self.is_client_error() {
            debug!("Pricing request rejected: {}", self);
            self.to_string()
        } else {
            error!("Pricing engine failure: {}", self);
            "An internal pricing error occurred".to_string()
        };

        let body = Json(json!({
            "error_code": self.error_code(),
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}
