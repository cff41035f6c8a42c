//! Settlement orchestrator: turns a cart into a durable order exactly once.
//!
//! The pipeline is `Initiated -> Authorizing -> Authorized -> Capturing ->
//! Captured -> OrderPersisted -> Completed`, with `Declined`, `CaptureFailed`,
//! `PersistenceFailed`, and `Abandoned` as terminal failure branches. Each
//! attempt is keyed by an idempotency key; replaying a key after the order is
//! persisted returns that order without touching the payment provider, and
//! replaying after a failed capture resumes the recorded provider transaction
//! instead of authorizing again.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{checkout_attempt::AttemptState, order},
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{PaymentError, PaymentGateway},
    repositories::{
        AttemptUpdate, NewCheckoutAttempt, NewOrder, NewOrderItem, OrderRepository,
    },
    services::{
        carts::{CartLine, CartSnapshot, CartStore, ShopperId},
        catalog::CatalogGateway,
    },
};

/// Checkout submission. The idempotency key may come from the client (so its
/// retries are recognizable); one is generated otherwise.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 8, max = 128))]
    pub idempotency_key: Option<String>,

    /// Provider-specific payment reference: a card token, a PayPal billing
    /// token, or a client-confirmed payment intent id.
    #[validate(length(min = 1))]
    pub payment_method_ref: String,
}

#[derive(Debug)]
pub struct CheckoutOutcome {
    pub order: order::Model,
    /// True when this call observed an already-settled attempt instead of
    /// running the pipeline.
    pub replayed: bool,
}

/// The one component with multi-step failure semantics. Everything it talks
/// to is an injected trait object.
pub struct SettlementService {
    orders: Arc<dyn OrderRepository>,
    carts: Arc<dyn CartStore>,
    catalog: Arc<dyn CatalogGateway>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    currency: String,
    provider_timeout: Duration,
    /// Per-key serialization for duplicate submissions hitting this instance;
    /// the unique constraint in the repository backstops other instances.
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl SettlementService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        carts: Arc<dyn CartStore>,
        catalog: Arc<dyn CatalogGateway>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        currency: impl Into<String>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            carts,
            catalog,
            gateway,
            events,
            currency: currency.into(),
            provider_timeout,
            in_flight: DashMap::new(),
        }
    }

    /// Runs one checkout attempt end to end.
    ///
    /// Near-simultaneous submissions with the same key are serialized here;
    /// the loser of the race re-checks for a persisted order and replays it
    /// rather than issuing a second authorization.
    #[instrument(skip(self, request), fields(shopper = %shopper))]
    pub async fn checkout(
        &self,
        shopper: ShopperId,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let lock = {
            let entry = self.in_flight.entry(key.clone()).or_default();
            entry.clone()
        };
        let _guard = lock.lock().await;

        let outcome = self
            .run(&shopper, &key, &request.payment_method_ref)
            .await;

        // The entry exists only to serialize concurrent submissions; the
        // durable attempt record carries retry state. Keys are client-minted,
        // so entries must not outlive their submissions: drop ours unless
        // another waiter still holds a clone (map's reference plus ours = 2).
        self.in_flight
            .remove_if(&key, |_, entry| Arc::strong_count(entry) <= 2);
        outcome
    }

    /// Number of idempotency keys with a submission currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    async fn run(
        &self,
        shopper: &ShopperId,
        key: &str,
        payment_method_ref: &str,
    ) -> Result<CheckoutOutcome, ServiceError> {
        // Idempotent replay: the core correctness guarantee. No provider
        // call happens once an order exists under this key. The key alone is
        // not proof of ownership; a settled order only replays to the shopper
        // who created it.
        if let Some(existing) = self.orders.find_by_idempotency_key(key).await? {
            if existing.shopper_id != shopper.to_string() {
                return Err(ServiceError::Conflict(format!(
                    "idempotency key {} belongs to a different shopper",
                    key
                )));
            }
            info!(idempotency_key = %key, order_id = %existing.id, "replaying settled checkout");
            return Ok(CheckoutOutcome {
                order: existing,
                replayed: true,
            });
        }

        self.events
            .send_or_log(Event::CheckoutStarted {
                idempotency_key: key.to_string(),
                shopper: shopper.to_string(),
            })
            .await;

        let prior = self.orders.find_attempt(key).await?;
        if let Some(attempt) = prior.as_ref() {
            if attempt.shopper_id != shopper.to_string() {
                return Err(ServiceError::Conflict(format!(
                    "idempotency key {} belongs to a different shopper",
                    key
                )));
            }

            // Authorization already happened: resume the same provider
            // transaction at capture, never authorize a second time.
            if attempt.state.resumes_at_capture() {
                if let Some(txn_id) = attempt.provider_txn_id.clone() {
                    info!(idempotency_key = %key, provider_txn_id = %txn_id, "resuming settlement at capture");
                    let lines = decode_snapshot(&attempt.cart_snapshot)?;
                    return self
                        .capture_and_persist(shopper, key, attempt.total_amount, lines, txn_id)
                        .await;
                }
            }

            // Money moved without an order; a blind re-run could create a
            // duplicate order for the captured payment. Operator territory.
            if attempt.state == AttemptState::PersistenceFailed {
                return Err(ServiceError::PersistenceError(format!(
                    "checkout attempt {} awaits reconciliation",
                    key
                )));
            }

            if !attempt.state.restartable() {
                return Err(ServiceError::InternalError(format!(
                    "checkout attempt {} in state {:?} but no order recorded",
                    key, attempt.state
                )));
            }
        }

        // The attempt operates on an immutable snapshot from here on; cart
        // edits made while settlement is in flight do not affect it.
        let cart = self.carts.snapshot(shopper).await?;
        if cart.is_empty() {
            return Err(ServiceError::InvalidOperation("cart is empty".to_string()));
        }

        let snapshot_json = encode_snapshot(&cart.lines)?;
        match prior {
            None => {
                self.orders
                    .record_attempt(NewCheckoutAttempt {
                        idempotency_key: key.to_string(),
                        shopper: shopper.clone(),
                        cart_snapshot: snapshot_json,
                        total_amount: cart.total_price(),
                        currency: self.currency.clone(),
                        provider: self.gateway.provider().to_string(),
                    })
                    .await?;
            }
            Some(_) => {
                // Declined or abandoned attempt being re-run: start over with
                // the current cart.
                self.orders
                    .reset_attempt(key, snapshot_json, cart.total_price())
                    .await?;
            }
        }

        // Revalidate against the catalog before any payment call. The charge
        // amount comes from live prices; the cart's cached snapshot is
        // untrusted input.
        let (charge_lines, total) = match self.revalidate(&cart).await {
            Ok(result) => result,
            Err(err) => {
                let state = match err {
                    ServiceError::ItemUnavailable { .. } | ServiceError::PriceChanged { .. } => {
                        AttemptState::Declined
                    }
                    // Catalog outage: nothing happened, safe to retry.
                    _ => AttemptState::Abandoned,
                };
                self.orders
                    .update_attempt(key, AttemptUpdate::failed(state, err.to_string()))
                    .await?;
                self.fail_event(key, &err).await;
                return Err(err);
            }
        };

        // Persist the authoritative prices so a capture-resume creates the
        // order from what was actually charged.
        self.orders
            .reset_attempt(key, encode_snapshot(&charge_lines)?, total)
            .await?;

        self.orders
            .update_attempt(key, AttemptUpdate::state(AttemptState::Authorizing))
            .await?;

        let authorization = match self
            .with_timeout(self.gateway.authorize(total, &self.currency, payment_method_ref))
            .await
        {
            Ok(auth) => auth,
            Err(PaymentError::Declined(message)) => {
                self.orders
                    .update_attempt(
                        key,
                        AttemptUpdate::failed(AttemptState::Declined, message.clone()),
                    )
                    .await?;
                let err = ServiceError::ProviderDeclined(message);
                self.fail_event(key, &err).await;
                return Err(err);
            }
            Err(PaymentError::Unavailable(message))
            | Err(PaymentError::CaptureFailed(message)) => {
                self.orders
                    .update_attempt(
                        key,
                        AttemptUpdate::failed(AttemptState::Abandoned, message.clone()),
                    )
                    .await?;
                let err = ServiceError::ProviderUnavailable(message);
                self.fail_event(key, &err).await;
                return Err(err);
            }
        };

        // The provider transaction id must be durable before capture is
        // attempted: if we crash past this point, the retry completes this
        // transaction instead of authorizing a new one.
        self.orders
            .update_attempt(
                key,
                AttemptUpdate {
                    state: Some(AttemptState::Authorized),
                    provider_txn_id: Some(authorization.provider_txn_id.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.events
            .send_or_log(Event::PaymentAuthorized {
                idempotency_key: key.to_string(),
                provider_txn_id: authorization.provider_txn_id.clone(),
            })
            .await;

        self.capture_and_persist(shopper, key, total, charge_lines, authorization.provider_txn_id)
            .await
    }

    /// Capture onwards: shared by the fresh path and the capture-resume path.
    async fn capture_and_persist(
        &self,
        shopper: &ShopperId,
        key: &str,
        total: Decimal,
        lines: Vec<CartLine>,
        provider_txn_id: String,
    ) -> Result<CheckoutOutcome, ServiceError> {
        self.orders
            .update_attempt(key, AttemptUpdate::state(AttemptState::Capturing))
            .await?;

        let capture = match self.with_timeout(self.gateway.capture(&provider_txn_id)).await {
            Ok(capture) => capture,
            Err(err) => {
                // The authorization stands and its transaction id is already
                // recorded; the retry path resumes here.
                self.orders
                    .update_attempt(
                        key,
                        AttemptUpdate::failed(AttemptState::CaptureFailed, err.to_string()),
                    )
                    .await?;
                let err = match err {
                    PaymentError::Unavailable(message) => {
                        ServiceError::ProviderUnavailable(message)
                    }
                    PaymentError::Declined(message) | PaymentError::CaptureFailed(message) => {
                        ServiceError::CaptureFailed(message)
                    }
                };
                self.fail_event(key, &err).await;
                return Err(err);
            }
        };

        self.orders
            .update_attempt(key, AttemptUpdate::state(AttemptState::Captured))
            .await?;
        self.events
            .send_or_log(Event::PaymentCaptured {
                idempotency_key: key.to_string(),
                provider_txn_id: capture.provider_txn_id.clone(),
            })
            .await;

        let items = lines
            .iter()
            .map(|line| NewOrderItem {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect();

        let new_order = NewOrder {
            shopper: shopper.clone(),
            total_amount: total,
            currency: self.currency.clone(),
            payment_provider: self.gateway.provider().to_string(),
            provider_reference: capture.provider_txn_id.clone(),
            idempotency_key: key.to_string(),
        };

        let order = match self.orders.create_order_with_items(new_order, items).await {
            Ok(order) => order,
            Err(err) => {
                // Captured payment, no order. Keep every handle an operator
                // needs and do not retry automatically.
                error!(
                    idempotency_key = %key,
                    provider_txn_id = %capture.provider_txn_id,
                    error = %err,
                    "order persistence failed after capture"
                );
                if let Err(mark_err) = self
                    .orders
                    .update_attempt(
                        key,
                        AttemptUpdate::failed(AttemptState::PersistenceFailed, err.to_string()),
                    )
                    .await
                {
                    error!(idempotency_key = %key, error = %mark_err, "failed to mark attempt for reconciliation");
                }
                self.events
                    .send_or_log(Event::ReconciliationRequired {
                        idempotency_key: key.to_string(),
                        provider_txn_id: capture.provider_txn_id.clone(),
                    })
                    .await;
                return Err(ServiceError::PersistenceError(err.to_string()));
            }
        };

        self.orders
            .update_attempt(
                key,
                AttemptUpdate {
                    state: Some(AttemptState::OrderPersisted),
                    order_id: Some(order.id),
                    ..Default::default()
                },
            )
            .await?;
        self.events.send_or_log(Event::OrderCreated(order.id)).await;

        // Clearing before persistence is forbidden; a crash in between would
        // lose the purchase. By here the order is durable, so a failed clear
        // only leaves a stale cart behind.
        match self.carts.clear(shopper).await {
            Ok(()) => {
                self.orders
                    .update_attempt(key, AttemptUpdate::state(AttemptState::Completed))
                    .await?;
                self.events
                    .send_or_log(Event::CartCleared {
                        shopper: shopper.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                warn!(shopper = %shopper, error = %err, "cart clear failed after order persisted");
            }
        }

        info!(idempotency_key = %key, order_id = %order.id, total = %total, "settlement complete");
        Ok(CheckoutOutcome {
            order,
            replayed: false,
        })
    }

    /// Re-prices every cart line from the catalog. Any unavailable item or
    /// price drift rejects the whole attempt before a payment call is made.
    async fn revalidate(
        &self,
        cart: &CartSnapshot,
    ) -> Result<(Vec<CartLine>, Decimal), ServiceError> {
        let mut lines = Vec::with_capacity(cart.lines.len());
        let mut total = Decimal::ZERO;

        for line in &cart.lines {
            let product = self
                .catalog
                .get_product(line.product_id)
                .await?
                .ok_or(ServiceError::ItemUnavailable {
                    product_id: line.product_id,
                })?;

            if !product.in_stock {
                return Err(ServiceError::ItemUnavailable {
                    product_id: line.product_id,
                });
            }
            if product.price != line.unit_price {
                return Err(ServiceError::PriceChanged {
                    product_id: line.product_id,
                    cart_price: line.unit_price,
                    current_price: product.price,
                });
            }

            total += product.price * Decimal::from(line.quantity);
            lines.push(CartLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }

        Ok((lines, total))
    }

    /// A timed-out provider call is an outage, never a decline: the two have
    /// different retry semantics for the caller.
    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, PaymentError>> + Send,
    ) -> Result<T, PaymentError> {
        match tokio::time::timeout(self.provider_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Unavailable(
                "payment provider call timed out".to_string(),
            )),
        }
    }

    async fn fail_event(&self, key: &str, err: &ServiceError) {
        self.events
            .send_or_log(Event::SettlementFailed {
                idempotency_key: key.to_string(),
                reason: err.to_string(),
            })
            .await;
    }
}

fn encode_snapshot(lines: &[CartLine]) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(lines)
        .map_err(|e| ServiceError::InternalError(format!("cart snapshot encode: {}", e)))
}

fn decode_snapshot(value: &serde_json::Value) -> Result<Vec<CartLine>, ServiceError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ServiceError::InternalError(format!("cart snapshot decode: {}", e)))
}
