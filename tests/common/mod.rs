//! Shared test doubles: a scripted payment gateway, a static catalog, and a
//! harness that wires them to the in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::{
    config::PaymentProviderKind,
    errors::ServiceError,
    events::EventSender,
    payments::{Authorization, Capture, PaymentError, PaymentGateway},
    repositories::{InMemoryOrderRepository, OrderRepository},
    services::{
        carts::{CartStore, InMemoryCartStore, ShopperId},
        catalog::{CatalogGateway, CatalogProduct},
        settlement::SettlementService,
    },
};

/// Payment gateway whose next failures are scripted per call. Counts calls
/// so tests can assert how often the provider was actually contacted.
pub struct ScriptedGateway {
    pub authorize_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub authorized_amounts: Mutex<Vec<Decimal>>,
    fail_authorize: Mutex<VecDeque<PaymentError>>,
    fail_capture: Mutex<VecDeque<PaymentError>>,
    authorize_delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            authorize_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            authorized_amounts: Mutex::new(Vec::new()),
            fail_authorize: Mutex::new(VecDeque::new()),
            fail_capture: Mutex::new(VecDeque::new()),
            authorize_delay: None,
        }
    }

    pub fn with_authorize_delay(delay: Duration) -> Self {
        Self {
            authorize_delay: Some(delay),
            ..Self::new()
        }
    }

    /// Queues a failure for the next authorize call.
    pub fn fail_next_authorize(&self, err: PaymentError) {
        self.fail_authorize.lock().unwrap().push_back(err);
    }

    /// Queues a failure for the next capture call.
    pub fn fail_next_capture(&self, err: PaymentError) {
        self.fail_capture.lock().unwrap().push_back(err);
    }

    pub fn authorize_count(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider(&self) -> PaymentProviderKind {
        PaymentProviderKind::Card
    }

    async fn authorize(
        &self,
        amount: Decimal,
        _currency: &str,
        _payment_method_ref: &str,
    ) -> Result<Authorization, PaymentError> {
        if let Some(delay) = self.authorize_delay {
            tokio::time::sleep(delay).await;
        }

        let call = self.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.authorized_amounts.lock().unwrap().push(amount);

        if let Some(err) = self.fail_authorize.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Authorization {
            provider_txn_id: format!("txn-{}", call),
        })
    }

    async fn capture(&self, provider_txn_id: &str) -> Result<Capture, PaymentError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.fail_capture.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Capture {
            provider_txn_id: provider_txn_id.to_string(),
            captured_at: Utc::now(),
        })
    }
}

/// Catalog backed by a map the test seeds directly.
pub struct StaticCatalog {
    products: DashMap<Uuid, CatalogProduct>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            products: DashMap::new(),
        }
    }

    pub fn put(&self, id: Uuid, price: Decimal, in_stock: bool) {
        self.products.insert(
            id,
            CatalogProduct {
                id,
                price,
                in_stock,
            },
        );
    }

    pub fn drop_product(&self, id: Uuid) {
        self.products.remove(&id);
    }
}

#[async_trait]
impl CatalogGateway for StaticCatalog {
    async fn get_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, ServiceError> {
        Ok(self.products.get(&id).map(|e| e.value().clone()))
    }
}

/// In-memory settlement pipeline with scripted collaborators.
pub struct Harness {
    pub carts: Arc<InMemoryCartStore>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub catalog: Arc<StaticCatalog>,
    pub gateway: Arc<ScriptedGateway>,
    pub settlement: Arc<SettlementService>,
    // Keeps the event channel open for the test's lifetime.
    _event_rx: mpsc::Receiver<storefront_api::events::Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway(ScriptedGateway::new())
    }

    pub fn with_gateway(gateway: ScriptedGateway) -> Self {
        Self::with_gateway_and_timeout(gateway, Duration::from_secs(5))
    }

    pub fn with_gateway_and_timeout(gateway: ScriptedGateway, provider_timeout: Duration) -> Self {
        let carts = Arc::new(InMemoryCartStore::new("USD"));
        let orders = Arc::new(InMemoryOrderRepository::new());
        let catalog = Arc::new(StaticCatalog::new());
        let gateway = Arc::new(gateway);

        let (event_tx, event_rx) = mpsc::channel(256);
        let settlement = Arc::new(SettlementService::new(
            orders.clone() as Arc<dyn OrderRepository>,
            carts.clone() as Arc<dyn CartStore>,
            catalog.clone() as Arc<dyn CatalogGateway>,
            gateway.clone() as Arc<dyn PaymentGateway>,
            EventSender::new(event_tx),
            "USD",
            provider_timeout,
        ));

        Self {
            carts,
            orders,
            catalog,
            gateway,
            settlement,
            _event_rx: event_rx,
        }
    }

    /// Seeds a product into the catalog and the shopper's cart at the same
    /// price.
    pub async fn seed_line(&self, shopper: &ShopperId, price: Decimal, quantity: i32) -> Uuid {
        let product_id = Uuid::new_v4();
        self.catalog.put(product_id, price, true);
        self.carts
            .add(shopper, product_id, quantity, price)
            .await
            .expect("seeding cart line");
        product_id
    }
}

pub fn shopper() -> ShopperId {
    ShopperId::User(Uuid::new_v4())
}
