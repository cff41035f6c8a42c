use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Error body returned by every handler.
///
/// `retryable` tells the caller whether resubmitting the same request (with the
/// same idempotency key, where one applies) is safe. Declines and stale-cart
/// rejections are final until the shopper changes something; provider outages
/// and transient storage failures are not.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub retryable: bool,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Revalidation found an item that is no longer purchasable.
    #[error("Item {product_id} is no longer available")]
    ItemUnavailable { product_id: Uuid },

    /// Revalidation found the live price diverged from the cart snapshot.
    #[error("Price of item {product_id} changed from {cart_price} to {current_price}")]
    PriceChanged {
        product_id: Uuid,
        cart_price: Decimal,
        current_price: Decimal,
    },

    /// The payment network rejected the charge. Final for this payment method.
    #[error("Payment declined: {0}")]
    ProviderDeclined(String),

    /// Transient provider or network failure; safe to retry with the same
    /// idempotency key.
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Authorization went through but capture did not. A retry resumes from
    /// the recorded provider transaction instead of re-authorizing.
    #[error("Payment capture failed: {0}")]
    CaptureFailed(String),

    /// The order write failed after a successful capture. Not auto-retried:
    /// money has moved and a blind retry could double-create the order, so
    /// this is surfaced for reconciliation.
    #[error("Order persistence failed: {0}")]
    PersistenceError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::ItemUnavailable { .. } | Self::PriceChanged { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ProviderDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CaptureFailed(_) | Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::PersistenceError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable reason code carried in the error body.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::ItemUnavailable { .. } => Some("item_unavailable"),
            Self::PriceChanged { .. } => Some("price_changed"),
            Self::ProviderDeclined(_) => Some("provider_declined"),
            Self::ProviderUnavailable(_) => Some("provider_unavailable"),
            Self::CaptureFailed(_) => Some("capture_failed"),
            Self::PersistenceError(_) => Some("persistence_error"),
            _ => None,
        }
    }

    /// Whether the caller may safely resubmit the same request.
    ///
    /// Capture failures are retryable because the orchestrator resumes from
    /// the stored provider transaction. Persistence failures after capture
    /// are deliberately not: they go to reconciliation.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::CaptureFailed(_)
                | Self::ExternalServiceError(_)
                | Self::DatabaseError(_)
                | Self::Conflict(_)
        )
    }

    /// Message suitable for HTTP responses. Storage-level errors return a
    /// generic message to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Storage error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.response_message(),
            reason: self.reason_code().map(str::to_string),
            retryable: self.retryable(),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

/// Convenience conversion so the binary edge can bubble anyhow errors.
impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::InternalError(err.to_string())
    }
}
