use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of one checkout attempt, keyed by idempotency key.
///
/// The cart snapshot and total are captured when the attempt starts and never
/// change; shopper edits to the live cart have no effect on an in-flight
/// attempt. `provider_txn_id` is written as soon as authorization succeeds so
/// a retry after a failed capture resumes the same provider transaction
/// instead of authorizing again.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_attempts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub idempotency_key: String,

    pub shopper_id: String,

    /// JSON array of `{product_id, quantity, unit_price}` lines, priced from
    /// the catalog at attempt start.
    #[sea_orm(column_type = "Json")]
    pub cart_snapshot: Json,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,

    pub currency: String,

    /// Provider name the attempt was started against.
    pub provider: String,

    pub state: AttemptState,

    #[sea_orm(nullable)]
    pub provider_txn_id: Option<String>,

    #[sea_orm(nullable)]
    pub order_id: Option<Uuid>,

    #[sea_orm(nullable)]
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Settlement state machine positions.
///
/// `Completed` is the terminal success (order persisted and cart cleared);
/// `Declined`, `CaptureFailed`, `PersistenceFailed`, and `Abandoned` are the
/// terminal failure branches. `Declined` and `Abandoned` attempts may be
/// re-run under the same key because nothing durable has moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
pub enum AttemptState {
    #[sea_orm(string_value = "initiated")]
    Initiated,
    #[sea_orm(string_value = "authorizing")]
    Authorizing,
    #[sea_orm(string_value = "authorized")]
    Authorized,
    #[sea_orm(string_value = "capturing")]
    Capturing,
    #[sea_orm(string_value = "captured")]
    Captured,
    #[sea_orm(string_value = "order_persisted")]
    OrderPersisted,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "declined")]
    Declined,
    #[sea_orm(string_value = "capture_failed")]
    CaptureFailed,
    #[sea_orm(string_value = "persistence_failed")]
    PersistenceFailed,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
}

impl AttemptState {
    /// States from which a retry must resume at capture: authorization has
    /// succeeded and a provider transaction exists.
    pub fn resumes_at_capture(&self) -> bool {
        matches!(
            self,
            AttemptState::Authorized
                | AttemptState::Capturing
                | AttemptState::CaptureFailed
                | AttemptState::Captured
        )
    }

    /// States that may be re-run from the top under the same key: no money
    /// has moved and no provider transaction is outstanding.
    pub fn restartable(&self) -> bool {
        matches!(
            self,
            AttemptState::Initiated
                | AttemptState::Authorizing
                | AttemptState::Declined
                | AttemptState::Abandoned
        )
    }
}
