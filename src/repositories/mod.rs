//! Durable storage for orders and checkout attempts.
//!
//! The settlement orchestrator is written against [`OrderRepository`] only;
//! the database-backed or in-memory implementation is chosen once at process
//! startup and injected. Orders are append-only: `create_order_with_items`
//! writes the order and its items atomically (both or neither), and nothing
//! ever deletes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    entities::{
        checkout_attempt::{self, AttemptState},
        order, order_item,
    },
    errors::ServiceError,
    services::carts::ShopperId,
};

pub mod database;
pub mod memory;

pub use database::SeaOrmOrderRepository;
pub use memory::InMemoryOrderRepository;

/// Input for the atomic order write.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub shopper: ShopperId,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_provider: String,
    pub provider_reference: String,
    pub idempotency_key: String,
}

#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Revalidated catalog price charged at purchase time.
    pub unit_price: Decimal,
}

/// An order with its line items, as read back for callers.
#[derive(Clone, Debug, serde::Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Input for recording a fresh checkout attempt.
#[derive(Clone, Debug)]
pub struct NewCheckoutAttempt {
    pub idempotency_key: String,
    pub shopper: ShopperId,
    pub cart_snapshot: serde_json::Value,
    pub total_amount: Decimal,
    pub currency: String,
    pub provider: String,
}

/// Partial update applied when an attempt changes state. Only `Some` fields
/// are written; `provider_txn_id` in particular is set once after
/// authorization and then left alone.
#[derive(Clone, Debug, Default)]
pub struct AttemptUpdate {
    pub state: Option<AttemptState>,
    pub provider_txn_id: Option<String>,
    pub order_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

impl AttemptUpdate {
    pub fn state(state: AttemptState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn failed(state: AttemptState, reason: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Writes the order and all of its items atomically. A failure leaves no
    /// partial order visible to readers.
    async fn create_order_with_items(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<order::Model, ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError>;

    /// Replay check: the order previously created under this key, if any.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<order::Model>, ServiceError>;

    async fn find_by_shopper(
        &self,
        shopper: &ShopperId,
    ) -> Result<Vec<order::Model>, ServiceError>;

    /// The durable side of the settlement state machine.
    async fn find_attempt(
        &self,
        key: &str,
    ) -> Result<Option<checkout_attempt::Model>, ServiceError>;

    /// Records a fresh attempt. Fails with `Conflict` if an attempt already
    /// exists under the key: the unique constraint is the cross-instance
    /// serialization point for duplicate submissions.
    async fn record_attempt(
        &self,
        attempt: NewCheckoutAttempt,
    ) -> Result<checkout_attempt::Model, ServiceError>;

    async fn update_attempt(&self, key: &str, update: AttemptUpdate)
        -> Result<(), ServiceError>;

    /// Re-initializes a restartable attempt (declined or abandoned) with a
    /// fresh snapshot and total before the pipeline runs again.
    async fn reset_attempt(
        &self,
        key: &str,
        cart_snapshot: serde_json::Value,
        total_amount: Decimal,
    ) -> Result<(), ServiceError>;
}

pub(crate) fn order_number(id: Uuid) -> String {
    format!("ORD-{}", id.simple().to_string()[..8].to_uppercase())
}

pub(crate) fn now_pair() -> (DateTime<Utc>, Option<DateTime<Utc>>) {
    let now = Utc::now();
    (now, Some(now))
}
