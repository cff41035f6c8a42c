use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::instrument;
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

/// sea-orm backed repository. The unique indexes on
/// `orders.idempotency_key` and `checkout_attempts.idempotency_key` enforce
/// at-most-one order and at-most-one attempt per key across instances.
pub struct SeaOrmOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn attempt_by_key(
        &self,
        key: &str,
    ) -> Result<Option<checkout_attempt::Model>, ServiceError> {
        Ok(checkout_attempt::Entity::find()
            .filter(checkout_attempt::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?)
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    #[instrument(skip(self, items))]
    async fn create_order_with_items(
        &self,
        new_order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::PersistenceError(e.to_string()))?;

        let order_id = Uuid::new_v4();
        let (created_at, updated_at) = super::now_pair();

        let model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number(order_id)),
            shopper_id: Set(new_order.shopper.to_string()),
            status: Set("paid".to_string()),
            total_amount: Set(new_order.total_amount),
            currency: Set(new_order.currency),
            payment_provider: Set(new_order.payment_provider),
            provider_reference: Set(new_order.provider_reference),
            idempotency_key: Set(new_order.idempotency_key),
            created_at: Set(created_at),
            updated_at: Set(updated_at),
        };

        let inserted = model
            .insert(&txn)
            .await
            .map_err(|e| ServiceError::PersistenceError(e.to_string()))?;

        for item in items {
            let row = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(created_at),
            };
            row.insert(&txn)
                .await
                .map_err(|e| ServiceError::PersistenceError(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| ServiceError::PersistenceError(e.to_string()))?;

        Ok(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = order::Entity::find_by_id(id).one(&*self.db).await? else {
            return Ok(None);
        };

        let items = order
            .find_related(order_item::Entity)
            .all(&*self.db)
            .await?;

        Ok(Some(OrderWithItems { order, items }))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?)
    }

    async fn find_by_shopper(
        &self,
        shopper: &ShopperId,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::ShopperId.eq(shopper.to_string()))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn find_attempt(
        &self,
        key: &str,
    ) -> Result<Option<checkout_attempt::Model>, ServiceError> {
        self.attempt_by_key(key).await
    }

    #[instrument(skip(self, attempt), fields(key = %attempt.idempotency_key))]
    async fn record_attempt(
        &self,
        attempt: NewCheckoutAttempt,
    ) -> Result<checkout_attempt::Model, ServiceError> {
        let now = Utc::now();
        let model = checkout_attempt::ActiveModel {
            id: Set(Uuid::new_v4()),
            idempotency_key: Set(attempt.idempotency_key.clone()),
            shopper_id: Set(attempt.shopper.to_string()),
            cart_snapshot: Set(attempt.cart_snapshot),
            total_amount: Set(attempt.total_amount),
            currency: Set(attempt.currency),
            provider: Set(attempt.provider),
            state: Set(AttemptState::Initiated),
            provider_txn_id: Set(None),
            order_id: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&*self.db).await.map_err(|e| {
            // Unique violation on the key means another submission won the race.
            ServiceError::Conflict(format!(
                "checkout attempt {} already recorded: {}",
                attempt.idempotency_key, e
            ))
        })
    }

    async fn update_attempt(
        &self,
        key: &str,
        update: AttemptUpdate,
    ) -> Result<(), ServiceError> {
        let existing = self
            .attempt_by_key(key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("checkout attempt {}", key)))?;

        let mut model: checkout_attempt::ActiveModel = existing.into();
        if let Some(state) = update.state {
            model.state = Set(state);
        }
        if let Some(txn_id) = update.provider_txn_id {
            model.provider_txn_id = Set(Some(txn_id));
        }
        if let Some(order_id) = update.order_id {
            model.order_id = Set(Some(order_id));
        }
        if let Some(reason) = update.failure_reason {
            model.failure_reason = Set(Some(reason));
        }
        model.updated_at = Set(Utc::now());
        model.update(&*self.db).await?;
        Ok(())
    }

    async fn reset_attempt(
        &self,
        key: &str,
        cart_snapshot: serde_json::Value,
        total_amount: Decimal,
    ) -> Result<(), ServiceError> {
        let existing = self
            .attempt_by_key(key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("checkout attempt {}", key)))?;

        let mut model: checkout_attempt::ActiveModel = existing.into();
        model.cart_snapshot = Set(cart_snapshot);
        model.total_amount = Set(total_amount);
        model.state = Set(AttemptState::Initiated);
        model.provider_txn_id = Set(None);
        model.failure_reason = Set(None);
        model.updated_at = Set(Utc::now());
        model.update(&*self.db).await?;
        Ok(())
    }
}
