//! Retail storefront backend.
//!
//! The interesting part is the cart-to-order settlement pipeline in
//! [`services::settlement`]: it reconciles a client-held cart against
//! authoritative catalog data, drives a payment provider through
//! authorize/capture, persists the order exactly once, and clears the cart
//! only after payment is durable. Everything around it (cart CRUD, order
//! lookup) is thin plumbing over injected stores.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod payments;
pub mod repositories;
pub mod services;

use events::EventSender;
use repositories::OrderRepository;
use services::{carts::CartStore, settlement::SettlementService};

/// Shared application state. Every store is a trait object chosen at
/// startup; handlers never know which implementation they got. The catalog
/// gateway is not here: only the settlement orchestrator talks to it.
pub struct AppState {
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderRepository>,
    pub settlement: Arc<SettlementService>,
    pub event_sender: EventSender,
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(handlers::api_routes())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
