use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::validate_input;
use crate::{
    errors::ServiceError,
    services::{
        carts::ShopperId,
        settlement::{CheckoutOutcome, CheckoutRequest},
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(checkout))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutPayload {
    pub shopper: ShopperId,
    #[serde(flatten)]
    #[validate]
    pub request: CheckoutRequest,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: String,
    pub total: Decimal,
    pub currency: String,
    pub provider_reference: String,
    /// True when this submission matched an already-settled attempt.
    pub replayed: bool,
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            order_id: outcome.order.id,
            order_number: outcome.order.order_number,
            status: outcome.order.status,
            total: outcome.order.total_amount,
            currency: outcome.order.currency,
            provider_reference: outcome.order.provider_reference,
            replayed: outcome.replayed,
        }
    }
}

/// `POST /api/checkout`: runs the settlement pipeline for the shopper's
/// cart. Declines and stale-cart rejections come back as 4xx with a reason
/// code; provider outages and persistence failures as 5xx with `retryable`
/// set accordingly.
async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckoutPayload>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .settlement
        .checkout(payload.shopper, payload.request)
        .await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(CheckoutResponse::from(outcome))))
}
