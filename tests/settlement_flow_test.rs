mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{shopper, Harness, ScriptedGateway};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use storefront_api::{
    entities::checkout_attempt::AttemptState,
    errors::ServiceError,
    payments::PaymentError,
    repositories::{
        AttemptUpdate, InMemoryOrderRepository, NewCheckoutAttempt, NewOrder, NewOrderItem,
        OrderRepository, OrderWithItems,
    },
    services::{
        carts::{CartStore, ShopperId},
        settlement::CheckoutRequest,
    },
};

fn request(key: &str) -> CheckoutRequest {
    CheckoutRequest {
        idempotency_key: Some(key.to_string()),
        payment_method_ref: "tok_visa".to_string(),
    }
}

#[tokio::test]
async fn settles_cart_into_order_and_clears_cart() {
    let h = Harness::new();
    let shopper = shopper();
    let product = h.seed_line(&shopper, dec!(9.99), 2).await;

    let outcome = h
        .settlement
        .checkout(shopper.clone(), request("abc-1234"))
        .await
        .expect("checkout should settle");

    assert!(!outcome.replayed);
    assert_eq!(outcome.order.total_amount, dec!(19.98));
    assert_eq!(outcome.order.currency, "USD");
    assert_eq!(outcome.order.provider_reference, "txn-1");

    // Order and items are durable and atomic.
    let stored = h
        .orders
        .find_by_id(outcome.order.id)
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].product_id, product);
    assert_eq!(stored.items[0].quantity, 2);
    assert_eq!(stored.items[0].unit_price, dec!(9.99));

    // The charge used the authoritative amount, once.
    assert_eq!(h.gateway.authorize_count(), 1);
    assert_eq!(h.gateway.capture_count(), 1);
    assert_eq!(
        h.gateway.authorized_amounts.lock().unwrap().as_slice(),
        &[dec!(19.98)]
    );

    // Cart cleared only after persistence; attempt reached the terminal
    // success state.
    assert!(h.carts.snapshot(&shopper).await.unwrap().is_empty());
    let attempt = h.orders.find_attempt("abc-1234").await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Completed);
}

#[tokio::test]
async fn replaying_a_settled_key_returns_the_same_order_without_charging() {
    let h = Harness::new();
    let shopper = shopper();
    h.seed_line(&shopper, dec!(9.99), 2).await;

    let first = h
        .settlement
        .checkout(shopper.clone(), request("abc-1234"))
        .await
        .unwrap();
    let second = h
        .settlement
        .checkout(shopper.clone(), request("abc-1234"))
        .await
        .unwrap();

    assert!(second.replayed);
    assert_eq!(first.order.id, second.order.id);
    assert_eq!(h.gateway.authorize_count(), 1);
    assert_eq!(h.gateway.capture_count(), 1);
}

#[tokio::test]
async fn settled_key_cannot_be_replayed_by_another_shopper() {
    let h = Harness::new();
    let owner = shopper();
    h.seed_line(&owner, dec!(9.99), 2).await;

    let settled = h
        .settlement
        .checkout(owner.clone(), request("shared-key-1"))
        .await
        .unwrap();

    // Same key, different shopper: the order must not leak.
    let err = h
        .settlement
        .checkout(shopper(), request("shared-key-1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(h.gateway.authorize_count(), 1);

    // The owner still replays normally.
    let replay = h
        .settlement
        .checkout(owner, request("shared-key-1"))
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.order.id, settled.order.id);
}

#[tokio::test]
async fn slow_provider_surfaces_as_outage_not_decline() {
    let h = Harness::with_gateway_and_timeout(
        ScriptedGateway::with_authorize_delay(Duration::from_millis(200)),
        Duration::from_millis(50),
    );
    let shopper = shopper();
    h.seed_line(&shopper, dec!(10.00), 1).await;

    let err = h
        .settlement
        .checkout(shopper.clone(), request("slow-key-1"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ProviderUnavailable(_));
    assert!(err.retryable());
    let attempt = h.orders.find_attempt("slow-key-1").await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Abandoned);
}

#[tokio::test]
async fn failed_submissions_release_their_lock_entries() {
    let h = Harness::new();
    let shopper = shopper();

    // Empty-cart rejections with client-minted keys.
    for key in ["spam-key-1", "spam-key-2", "spam-key-3"] {
        h.settlement
            .checkout(shopper.clone(), request(key))
            .await
            .unwrap_err();
    }
    assert_eq!(h.settlement.in_flight_count(), 0);

    // A terminal decline releases its entry too.
    h.seed_line(&shopper, dec!(5.00), 1).await;
    h.gateway
        .fail_next_authorize(PaymentError::Declined("insufficient funds".into()));
    h.settlement
        .checkout(shopper.clone(), request("spam-key-4"))
        .await
        .unwrap_err();
    assert_eq!(h.settlement.in_flight_count(), 0);
}

#[tokio::test]
async fn price_drift_rejects_before_any_payment_call() {
    let h = Harness::new();
    let shopper = shopper();
    let product = h.seed_line(&shopper, dec!(10.00), 1).await;

    // Catalog price moves after the item went into the cart.
    h.catalog.put(product, dec!(15.00), true);

    let err = h
        .settlement
        .checkout(shopper.clone(), request("stale-key-1"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PriceChanged { .. });
    assert_eq!(h.gateway.authorize_count(), 0);
    // Nothing durable happened and the cart is untouched.
    assert!(h
        .orders
        .find_by_idempotency_key("stale-key-1")
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.carts.snapshot(&shopper).await.unwrap().total_items(), 1);
}

#[tokio::test]
async fn unavailable_item_rejects_before_any_payment_call() {
    let h = Harness::new();
    let shopper = shopper();
    let product = h.seed_line(&shopper, dec!(10.00), 1).await;
    h.catalog.put(product, dec!(10.00), false);

    let err = h
        .settlement
        .checkout(shopper.clone(), request("oos-key-1"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ItemUnavailable { product_id } if product_id == product);
    assert_eq!(h.gateway.authorize_count(), 0);

    // A product the catalog no longer knows about is the same verdict.
    h.catalog.drop_product(product);
    let err = h
        .settlement
        .checkout(shopper.clone(), request("oos-key-2"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ItemUnavailable { .. });
}

#[tokio::test]
async fn decline_is_terminal_and_leaves_no_order() {
    let h = Harness::new();
    let shopper = shopper();
    h.seed_line(&shopper, dec!(25.00), 1).await;
    h.gateway
        .fail_next_authorize(PaymentError::Declined("insufficient funds".into()));

    let err = h
        .settlement
        .checkout(shopper.clone(), request("declined-1"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ProviderDeclined(_));
    assert!(!err.retryable());
    assert!(h
        .orders
        .find_by_idempotency_key("declined-1")
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.carts.snapshot(&shopper).await.unwrap().total_items(), 1);

    let attempt = h.orders.find_attempt("declined-1").await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Declined);
}

#[tokio::test]
async fn provider_outage_is_retryable_with_the_same_key() {
    let h = Harness::new();
    let shopper = shopper();
    h.seed_line(&shopper, dec!(30.00), 1).await;
    h.gateway
        .fail_next_authorize(PaymentError::Unavailable("connection reset".into()));

    let err = h
        .settlement
        .checkout(shopper.clone(), request("outage-1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProviderUnavailable(_));
    assert!(err.retryable());

    let attempt = h.orders.find_attempt("outage-1").await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Abandoned);

    // Same key, second try: a fresh authorization is fine because the first
    // never went through.
    let outcome = h
        .settlement
        .checkout(shopper.clone(), request("outage-1"))
        .await
        .expect("retry settles");
    assert_eq!(h.gateway.authorize_count(), 2);
    assert_eq!(outcome.order.total_amount, dec!(30.00));
}

#[tokio::test]
async fn capture_failure_resumes_the_same_transaction_without_reauthorizing() {
    let h = Harness::new();
    let shopper = shopper();
    h.seed_line(&shopper, dec!(12.50), 2).await;
    h.gateway
        .fail_next_capture(PaymentError::CaptureFailed("processor hiccup".into()));

    let err = h
        .settlement
        .checkout(shopper.clone(), request("capture-1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CaptureFailed(_));
    assert!(err.retryable());

    // The authorization's transaction id was recorded before capture.
    let attempt = h.orders.find_attempt("capture-1").await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::CaptureFailed);
    assert_eq!(attempt.provider_txn_id.as_deref(), Some("txn-1"));

    let outcome = h
        .settlement
        .checkout(shopper.clone(), request("capture-1"))
        .await
        .expect("retry completes the capture");

    // One authorization total; the retry captured the existing transaction.
    assert_eq!(h.gateway.authorize_count(), 1);
    assert_eq!(h.gateway.capture_count(), 2);
    assert_eq!(outcome.order.provider_reference, "txn-1");
    assert!(h.carts.snapshot(&shopper).await.unwrap().is_empty());
}

#[tokio::test]
async fn resumed_capture_uses_the_attempt_snapshot_not_the_live_cart() {
    let h = Harness::new();
    let shopper = shopper();
    let original = h.seed_line(&shopper, dec!(12.50), 2).await;
    h.gateway
        .fail_next_capture(PaymentError::Unavailable("timeout".into()));

    h.settlement
        .checkout(shopper.clone(), request("resume-1"))
        .await
        .unwrap_err();

    // Shopper keeps shopping while the attempt is stuck at capture.
    h.seed_line(&shopper, dec!(99.00), 1).await;

    let outcome = h
        .settlement
        .checkout(shopper.clone(), request("resume-1"))
        .await
        .expect("retry completes");

    let stored = h
        .orders
        .find_by_id(outcome.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].product_id, original);
    assert_eq!(outcome.order.total_amount, dec!(25.00));
}

#[tokio::test]
async fn empty_cart_is_rejected_before_anything_happens() {
    let h = Harness::new();
    let err = h
        .settlement
        .checkout(shopper(), request("empty-key-1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
    assert_eq!(h.gateway.authorize_count(), 0);
}

#[tokio::test]
async fn missing_idempotency_key_is_generated_server_side() {
    let h = Harness::new();
    let shopper = shopper();
    h.seed_line(&shopper, dec!(5.00), 1).await;

    let outcome = h
        .settlement
        .checkout(
            shopper,
            CheckoutRequest {
                idempotency_key: None,
                payment_method_ref: "tok_visa".to_string(),
            },
        )
        .await
        .expect("checkout settles");
    assert!(!outcome.order.idempotency_key.is_empty());
}

#[tokio::test]
async fn concurrent_duplicate_submissions_authorize_once() {
    let h = Harness::with_gateway(ScriptedGateway::with_authorize_delay(
        Duration::from_millis(50),
    ));
    let shopper = shopper();
    h.seed_line(&shopper, dec!(7.00), 3).await;

    let s1 = h.settlement.clone();
    let s2 = h.settlement.clone();
    let shopper1 = shopper.clone();
    let shopper2 = shopper.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { s1.checkout(shopper1, request("double-click")).await }),
        tokio::spawn(async move { s2.checkout(shopper2, request("double-click")).await }),
    );
    let a = a.unwrap().expect("first submission settles");
    let b = b.unwrap().expect("second submission observes the first");

    assert_eq!(h.gateway.authorize_count(), 1);
    assert_eq!(a.order.id, b.order.id);
    assert!(a.replayed != b.replayed, "exactly one side replays");
}

/// Repository wrapper that fails the atomic order write on demand while
/// delegating everything else.
struct FailingOrderRepo {
    inner: InMemoryOrderRepository,
    fail_create: AtomicBool,
}

#[async_trait]
impl OrderRepository for FailingOrderRepo {
    async fn create_order_with_items(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<storefront_api::entities::order::Model, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::PersistenceError(
                "simulated write failure".into(),
            ));
        }
        self.inner.create_order_with_items(order, items).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<storefront_api::entities::order::Model>, ServiceError> {
        self.inner.find_by_idempotency_key(key).await
    }

    async fn find_by_shopper(
        &self,
        shopper: &ShopperId,
    ) -> Result<Vec<storefront_api::entities::order::Model>, ServiceError> {
        self.inner.find_by_shopper(shopper).await
    }

    async fn find_attempt(
        &self,
        key: &str,
    ) -> Result<Option<storefront_api::entities::checkout_attempt::Model>, ServiceError> {
        self.inner.find_attempt(key).await
    }

    async fn record_attempt(
        &self,
        attempt: NewCheckoutAttempt,
    ) -> Result<storefront_api::entities::checkout_attempt::Model, ServiceError> {
        self.inner.record_attempt(attempt).await
    }

    async fn update_attempt(
        &self,
        key: &str,
        update: AttemptUpdate,
    ) -> Result<(), ServiceError> {
        self.inner.update_attempt(key, update).await
    }

    async fn reset_attempt(
        &self,
        key: &str,
        cart_snapshot: serde_json::Value,
        total_amount: Decimal,
    ) -> Result<(), ServiceError> {
        self.inner.reset_attempt(key, cart_snapshot, total_amount).await
    }
}

#[tokio::test]
async fn persistence_failure_after_capture_keeps_cart_and_goes_to_reconciliation() {
    use storefront_api::{
        events::EventSender,
        payments::PaymentGateway,
        services::{carts::InMemoryCartStore, catalog::CatalogGateway},
        services::settlement::SettlementService,
    };

    let carts = Arc::new(InMemoryCartStore::new("USD"));
    let catalog = Arc::new(common::StaticCatalog::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let repo = Arc::new(FailingOrderRepo {
        inner: InMemoryOrderRepository::new(),
        fail_create: AtomicBool::new(true),
    });
    let (event_tx, _event_rx) = tokio::sync::mpsc::channel(64);

    let settlement = SettlementService::new(
        repo.clone() as Arc<dyn OrderRepository>,
        carts.clone() as Arc<dyn CartStore>,
        catalog.clone() as Arc<dyn CatalogGateway>,
        gateway.clone() as Arc<dyn PaymentGateway>,
        EventSender::new(event_tx),
        "USD",
        Duration::from_secs(5),
    );

    let shopper = shopper();
    let product = Uuid::new_v4();
    catalog.put(product, dec!(40.00), true);
    carts.add(&shopper, product, 1, dec!(40.00)).await.unwrap();

    let err = settlement
        .checkout(shopper.clone(), request("recon-key-1"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PersistenceError(_));
    assert!(!err.retryable());

    // The captured payment's handles survive for the operator, and the cart
    // was not cleared.
    let attempt = repo.find_attempt("recon-key-1").await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::PersistenceFailed);
    assert_eq!(attempt.provider_txn_id.as_deref(), Some("txn-1"));
    assert_eq!(carts.snapshot(&shopper).await.unwrap().total_items(), 1);

    // A retry does not touch the provider again: reconciliation is manual.
    let err = settlement
        .checkout(shopper.clone(), request("recon-key-1"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PersistenceError(_));
    assert_eq!(gateway.authorize_count(), 1);
    assert_eq!(gateway.capture_count(), 1);
}
