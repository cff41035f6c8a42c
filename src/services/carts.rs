//! Cart store: per-shopper line items with display-price snapshots.
//!
//! The cart is the mutable, ephemeral side of the system. Its totals are for
//! display only; the settlement orchestrator re-prices everything from the
//! catalog before charging. Two implementations share the same invariants:
//! at most one line per product (quantities merge on add), non-positive add
//! quantities are no-ops, and setting a quantity to zero or below removes
//! the line.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    entities::{cart, cart_item},
    errors::ServiceError,
};

/// Identity a cart (and its orders) hangs off: an authenticated user id or an
/// anonymous session token. Rendered as `user:<uuid>` / `anon:<token>` in
/// paths, storage, and events.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShopperId {
    User(Uuid),
    Anonymous(String),
}

impl fmt::Display for ShopperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShopperId::User(id) => write!(f, "user:{}", id),
            ShopperId::Anonymous(token) => write!(f, "anon:{}", token),
        }
    }
}

impl FromStr for ShopperId {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(raw) = s.strip_prefix("user:") {
            let id = Uuid::parse_str(raw).map_err(|_| {
                ServiceError::ValidationError(format!("invalid user id in shopper '{}'", s))
            })?;
            return Ok(ShopperId::User(id));
        }
        if let Some(token) = s.strip_prefix("anon:") {
            if token.is_empty() {
                return Err(ServiceError::ValidationError(
                    "anonymous shopper token is empty".to_string(),
                ));
            }
            return Ok(ShopperId::Anonymous(token.to_string()));
        }
        Err(ServiceError::ValidationError(format!(
            "shopper id '{}' must start with 'user:' or 'anon:'",
            s
        )))
    }
}

impl Serialize for ShopperId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ShopperId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: ServiceError| de::Error::custom(e))
    }
}

/// One cart line. `unit_price` is the snapshot taken when the item was added
/// and is never trusted for charging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Point-in-time view of a shopper's cart, in insertion order.
#[derive(Clone, Debug, Serialize)]
pub struct CartSnapshot {
    pub shopper: ShopperId,
    pub currency: String,
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_items(&self) -> i32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Display total: sum of quantity x snapshot price. Never used as a
    /// charge amount.
    pub fn total_price(&self) -> Decimal {
        self.lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum()
    }
}

/// Persistent per-shopper cart storage.
///
/// Every mutation persists the new state, so the cart survives a process
/// restart. `clear` is the only operation the settlement orchestrator calls,
/// and only after the order is durably persisted.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn snapshot(&self, shopper: &ShopperId) -> Result<CartSnapshot, ServiceError>;

    /// Merges `quantity` into the shopper's line for `product_id`, creating
    /// the line if absent. A non-positive quantity is a no-op.
    async fn add(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<CartSnapshot, ServiceError>;

    /// Sets the line's quantity; zero or below removes the line.
    async fn set_quantity(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartSnapshot, ServiceError>;

    async fn remove(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError>;

    async fn clear(&self, shopper: &ShopperId) -> Result<(), ServiceError>;
}

/// In-memory cart store for single-instance deployments and tests.
pub struct InMemoryCartStore {
    carts: DashMap<String, Vec<CartLine>>,
    currency: String,
}

impl InMemoryCartStore {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            carts: DashMap::new(),
            currency: currency.into(),
        }
    }

    fn view(&self, shopper: &ShopperId) -> CartSnapshot {
        let lines = self
            .carts
            .get(&shopper.to_string())
            .map(|e| e.value().clone())
            .unwrap_or_default();
        CartSnapshot {
            shopper: shopper.clone(),
            currency: self.currency.clone(),
            lines,
        }
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn snapshot(&self, shopper: &ShopperId) -> Result<CartSnapshot, ServiceError> {
        Ok(self.view(shopper))
    }

    async fn add(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<CartSnapshot, ServiceError> {
        if quantity <= 0 {
            return Ok(self.view(shopper));
        }

        let mut entry = self.carts.entry(shopper.to_string()).or_default();
        match entry.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity += quantity,
            None => entry.push(CartLine {
                product_id,
                quantity,
                unit_price,
            }),
        }
        drop(entry);

        Ok(self.view(shopper))
    }

    async fn set_quantity(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartSnapshot, ServiceError> {
        if quantity <= 0 {
            return self.remove(shopper, product_id).await;
        }

        if let Some(mut entry) = self.carts.get_mut(&shopper.to_string()) {
            if let Some(line) = entry.iter_mut().find(|l| l.product_id == product_id) {
                line.quantity = quantity;
            }
        }
        Ok(self.view(shopper))
    }

    async fn remove(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError> {
        if let Some(mut entry) = self.carts.get_mut(&shopper.to_string()) {
            entry.retain(|l| l.product_id != product_id);
        }
        Ok(self.view(shopper))
    }

    async fn clear(&self, shopper: &ShopperId) -> Result<(), ServiceError> {
        self.carts.remove(&shopper.to_string());
        Ok(())
    }
}

/// Database-backed cart store. One `carts` row per shopper, lines in
/// `cart_items`, mutations transactional.
pub struct SeaOrmCartStore {
    db: Arc<DatabaseConnection>,
    currency: String,
}

impl SeaOrmCartStore {
    pub fn new(db: Arc<DatabaseConnection>, currency: impl Into<String>) -> Self {
        Self {
            db,
            currency: currency.into(),
        }
    }

    async fn find_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper: &ShopperId,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(cart::Entity::find()
            .filter(cart::Column::ShopperId.eq(shopper.to_string()))
            .one(conn)
            .await?)
    }

    async fn get_or_create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper: &ShopperId,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_cart(conn, shopper).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            shopper_id: Set(shopper.to_string()),
            currency: Set(self.currency.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(conn).await?)
    }

    async fn lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<CartLine>, ServiceError> {
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?;

        Ok(items
            .into_iter()
            .map(|i| CartLine {
                product_id: i.product_id,
                quantity: i.quantity,
                unit_price: i.unit_price,
            })
            .collect())
    }

    async fn snapshot_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        shopper: &ShopperId,
    ) -> Result<CartSnapshot, ServiceError> {
        let lines = match self.find_cart(conn, shopper).await? {
            Some(cart) => self.lines(conn, cart.id).await?,
            None => Vec::new(),
        };
        Ok(CartSnapshot {
            shopper: shopper.clone(),
            currency: self.currency.clone(),
            lines,
        })
    }
}

#[async_trait]
impl CartStore for SeaOrmCartStore {
    async fn snapshot(&self, shopper: &ShopperId) -> Result<CartSnapshot, ServiceError> {
        self.snapshot_of(&*self.db, shopper).await
    }

    async fn add(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<CartSnapshot, ServiceError> {
        if quantity <= 0 {
            return self.snapshot(shopper).await;
        }

        let txn = self.db.begin().await?;
        let cart = self.get_or_create_cart(&txn, shopper).await?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let now = Utc::now();
        match existing {
            Some(item) => {
                let merged = item.quantity + quantity;
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(merged);
                item.updated_at = Set(now);
                item.update(&txn).await?;
            }
            None => {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    unit_price: Set(unit_price),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                item.insert(&txn).await?;
            }
        }

        let mut cart: cart::ActiveModel = cart.into();
        cart.updated_at = Set(now);
        cart.update(&txn).await?;

        let snapshot = self.snapshot_of(&txn, shopper).await?;
        txn.commit().await?;
        Ok(snapshot)
    }

    async fn set_quantity(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartSnapshot, ServiceError> {
        if quantity <= 0 {
            return self.remove(shopper, product_id).await;
        }

        let txn = self.db.begin().await?;
        if let Some(cart) = self.find_cart(&txn, shopper).await? {
            let existing = cart_item::Entity::find()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .one(&txn)
                .await?;

            if let Some(item) = existing {
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(Utc::now());
                item.update(&txn).await?;
            }
        }

        let snapshot = self.snapshot_of(&txn, shopper).await?;
        txn.commit().await?;
        Ok(snapshot)
    }

    async fn remove(
        &self,
        shopper: &ShopperId,
        product_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError> {
        let txn = self.db.begin().await?;
        if let Some(cart) = self.find_cart(&txn, shopper).await? {
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .exec(&txn)
                .await?;
        }
        let snapshot = self.snapshot_of(&txn, shopper).await?;
        txn.commit().await?;
        Ok(snapshot)
    }

    async fn clear(&self, shopper: &ShopperId) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        if let Some(cart) = self.find_cart(&txn, shopper).await? {
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&txn)
                .await?;

            let mut cart: cart::ActiveModel = cart.into();
            cart.updated_at = Set(Utc::now());
            cart.update(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shopper_id_round_trips() {
        let user = ShopperId::User(Uuid::new_v4());
        assert_eq!(user.to_string().parse::<ShopperId>().unwrap(), user);

        let anon = ShopperId::Anonymous("sess-42".to_string());
        assert_eq!(anon.to_string().parse::<ShopperId>().unwrap(), anon);

        assert!("customer-1".parse::<ShopperId>().is_err());
        assert!("anon:".parse::<ShopperId>().is_err());
        assert!("user:not-a-uuid".parse::<ShopperId>().is_err());
    }

    #[test]
    fn snapshot_totals() {
        let snapshot = CartSnapshot {
            shopper: ShopperId::Anonymous("t".to_string()),
            currency: "USD".to_string(),
            lines: vec![
                CartLine {
                    product_id: Uuid::new_v4(),
                    quantity: 2,
                    unit_price: dec!(9.99),
                },
                CartLine {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: dec!(100.00),
                },
            ],
        };
        assert_eq!(snapshot.total_items(), 3);
        assert_eq!(snapshot.total_price(), dec!(119.98));
    }
}
