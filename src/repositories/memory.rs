use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    order_number, AttemptUpdate, NewCheckoutAttempt, NewOrder, NewOrderItem, OrderRepository,
    OrderWithItems,
};
use crate::{
    entities::{
        checkout_attempt::{self, AttemptState},
        order, order_item,
    },
    errors::ServiceError,
    services::carts::ShopperId,
};

/// In-memory repository for single-instance deployments and tests.
///
/// An order and its items live in one map entry, written in a single insert,
/// so readers never observe an order without its items. The key index entry
/// is claimed first; losing that race is the in-memory equivalent of the
/// database unique-constraint violation.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, OrderWithItems>,
    by_key: DashMap<String, Uuid>,
    attempts: DashMap<String, checkout_attempt::Model>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create_order_with_items(
        &self,
        new_order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<order::Model, ServiceError> {
        let order_id = Uuid::new_v4();

        match self.by_key.entry(new_order.idempotency_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ServiceError::PersistenceError(format!(
                    "order already exists for idempotency key {}",
                    new_order.idempotency_key
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order_id);
            }
        }

        let (created_at, updated_at) = super::now_pair();
        let order = order::Model {
            id: order_id,
            order_number: order_number(order_id),
            shopper_id: new_order.shopper.to_string(),
            status: "paid".to_string(),
            total_amount: new_order.total_amount,
            currency: new_order.currency,
            payment_provider: new_order.payment_provider,
            provider_reference: new_order.provider_reference,
            idempotency_key: new_order.idempotency_key,
            created_at,
            updated_at,
        };

        let items = items
            .into_iter()
            .map(|i| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: i.product_id,
                quantity: i.quantity,
                unit_price: i.unit_price,
                total_price: i.unit_price * Decimal::from(i.quantity),
                created_at,
            })
            .collect();

        self.orders.insert(
            order_id,
            OrderWithItems {
                order: order.clone(),
                items,
            },
        );

        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        Ok(self.orders.get(&id).map(|e| e.value().clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let Some(id) = self.by_key.get(key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.orders.get(&id).map(|e| e.value().order.clone()))
    }

    async fn find_by_shopper(
        &self,
        shopper: &ShopperId,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let shopper = shopper.to_string();
        let mut orders: Vec<order::Model> = self
            .orders
            .iter()
            .filter(|e| e.value().order.shopper_id == shopper)
            .map(|e| e.value().order.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn find_attempt(
        &self,
        key: &str,
    ) -> Result<Option<checkout_attempt::Model>, ServiceError> {
        Ok(self.attempts.get(key).map(|e| e.value().clone()))
    }

    async fn record_attempt(
        &self,
        attempt: NewCheckoutAttempt,
    ) -> Result<checkout_attempt::Model, ServiceError> {
        let now = Utc::now();
        let model = checkout_attempt::Model {
            id: Uuid::new_v4(),
            idempotency_key: attempt.idempotency_key.clone(),
            shopper_id: attempt.shopper.to_string(),
            cart_snapshot: attempt.cart_snapshot,
            total_amount: attempt.total_amount,
            currency: attempt.currency,
            provider: attempt.provider,
            state: AttemptState::Initiated,
            provider_txn_id: None,
            order_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        match self.attempts.entry(attempt.idempotency_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ServiceError::Conflict(format!(
                "checkout attempt {} already recorded",
                attempt.idempotency_key
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(model.clone());
                Ok(model)
            }
        }
    }

    async fn update_attempt(
        &self,
        key: &str,
        update: AttemptUpdate,
    ) -> Result<(), ServiceError> {
        let mut entry = self
            .attempts
            .get_mut(key)
            .ok_or_else(|| ServiceError::NotFound(format!("checkout attempt {}", key)))?;

        let attempt = entry.value_mut();
        if let Some(state) = update.state {
            attempt.state = state;
        }
        if let Some(txn_id) = update.provider_txn_id {
            attempt.provider_txn_id = Some(txn_id);
        }
        if let Some(order_id) = update.order_id {
            attempt.order_id = Some(order_id);
        }
        if let Some(reason) = update.failure_reason {
            attempt.failure_reason = Some(reason);
        }
        attempt.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_attempt(
        &self,
        key: &str,
        cart_snapshot: serde_json::Value,
        total_amount: Decimal,
    ) -> Result<(), ServiceError> {
        let mut entry = self
            .attempts
            .get_mut(key)
            .ok_or_else(|| ServiceError::NotFound(format!("checkout attempt {}", key)))?;

        let attempt = entry.value_mut();
        attempt.cart_snapshot = cart_snapshot;
        attempt.total_amount = total_amount;
        attempt.state = AttemptState::Initiated;
        attempt.provider_txn_id = None;
        attempt.failure_reason = None;
        attempt.updated_at = Utc::now();
        Ok(())
    }
}
