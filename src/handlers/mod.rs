use axum::Router;
use std::sync::Arc;
use validator::Validate;

use crate::{errors::ServiceError, services::carts::ShopperId, AppState};

pub mod carts;
pub mod checkout;
pub mod orders;

/// Full API surface. The shopper-facing cart routes and the settlement
/// routes share one state.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api/cart", carts::routes())
        .nest("/api/checkout", checkout::routes())
        .nest("/api/orders", orders::routes())
}

pub(crate) fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

pub(crate) fn parse_shopper(raw: &str) -> Result<ShopperId, ServiceError> {
    raw.parse()
}
