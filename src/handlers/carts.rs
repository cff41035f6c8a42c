use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{parse_shopper, validate_input};
use crate::{
    errors::ServiceError,
    events::Event,
    services::carts::{CartLine, CartSnapshot},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:shopper", get(get_cart).delete(clear_cart))
        .route("/:shopper/items", post(add_item))
        .route(
            "/:shopper/items/:product_id",
            put(set_quantity).delete(remove_item),
        )
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    /// Must be positive; the store treats anything else as a no-op.
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Display price snapshot from the storefront. Untrusted: checkout
    /// re-prices from the catalog before charging.
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    /// Zero or below removes the line.
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub shopper: String,
    pub currency: String,
    pub total_items: i32,
    pub total_price: Decimal,
    pub lines: Vec<CartLine>,
}

impl From<CartSnapshot> for CartResponse {
    fn from(snapshot: CartSnapshot) -> Self {
        Self {
            shopper: snapshot.shopper.to_string(),
            currency: snapshot.currency.clone(),
            total_items: snapshot.total_items(),
            total_price: snapshot.total_price(),
            lines: snapshot.lines,
        }
    }
}

async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(shopper): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let shopper = parse_shopper(&shopper)?;
    let snapshot = state.carts.snapshot(&shopper).await?;
    Ok(Json(CartResponse::from(snapshot)))
}

async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(shopper): Path<String>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let shopper = parse_shopper(&shopper)?;

    let snapshot = state
        .carts
        .add(&shopper, payload.product_id, payload.quantity, payload.unit_price)
        .await?;

    state
        .event_sender
        .send_or_log(Event::CartItemAdded {
            shopper: shopper.to_string(),
            product_id: payload.product_id,
            quantity: payload.quantity,
        })
        .await;

    Ok((StatusCode::CREATED, Json(CartResponse::from(snapshot))))
}

async fn set_quantity(
    State(state): State<Arc<AppState>>,
    Path((shopper, product_id)): Path<(String, Uuid)>,
    Json(payload): Json<SetQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let shopper = parse_shopper(&shopper)?;
    let snapshot = state
        .carts
        .set_quantity(&shopper, product_id, payload.quantity)
        .await?;

    if payload.quantity <= 0 {
        state
            .event_sender
            .send_or_log(Event::CartItemRemoved {
                shopper: shopper.to_string(),
                product_id,
            })
            .await;
    }

    Ok(Json(CartResponse::from(snapshot)))
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((shopper, product_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let shopper = parse_shopper(&shopper)?;
    let snapshot = state.carts.remove(&shopper, product_id).await?;

    state
        .event_sender
        .send_or_log(Event::CartItemRemoved {
            shopper: shopper.to_string(),
            product_id,
        })
        .await;

    Ok(Json(CartResponse::from(snapshot)))
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(shopper): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let shopper = parse_shopper(&shopper)?;
    state.carts.clear(&shopper).await?;

    state
        .event_sender
        .send_or_log(Event::CartCleared {
            shopper: shopper.to_string(),
        })
        .await;

    Ok(StatusCode::NO_CONTENT)
}
