use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::parse_shopper;
use crate::{errors::ServiceError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_order))
        .route("/shopper/:shopper", get(list_orders))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .orders
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {}", id)))?;
    Ok(Json(order))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Path(shopper): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let shopper = parse_shopper(&shopper)?;
    let orders = state.orders.find_by_shopper(&shopper).await?;
    Ok(Json(orders))
}
