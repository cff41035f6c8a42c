use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable order record. Created exactly once per successful checkout attempt
/// and never mutated afterwards apart from status progression.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub order_number: String,

    /// String form of the owning shopper identity.
    pub shopper_id: String,

    pub status: String,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,

    pub currency: String,

    /// Which concrete provider settled the payment.
    pub payment_provider: String,

    /// Provider-side transaction reference for the captured charge.
    pub provider_reference: String,

    /// The checkout attempt key this order was created under. Unique: the
    /// database is the serialization point for duplicate submissions across
    /// instances.
    #[sea_orm(unique)]
    pub idempotency_key: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
