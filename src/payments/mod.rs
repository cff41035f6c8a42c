//! Payment gateway adapter: one `authorize`/`capture` contract over several
//! concrete providers. The adapter is a pure boundary to the payment network;
//! it never touches cart or order storage. Provider-specific failures are
//! translated into [`PaymentError`] here and nowhere else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::{PaymentConfig, PaymentProviderKind};

pub mod card;
pub mod paypal;
pub mod payment_element;

pub use card::CardGateway;
pub use payment_element::PaymentElementGateway;
pub use paypal::PayPalGateway;

/// Uniform failure taxonomy across providers.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The payment network rejected the charge. Not retryable with the same
    /// payment method.
    #[error("declined: {0}")]
    Declined(String),

    /// Capture of an authorized transaction failed. The transaction still
    /// exists on the provider side and can be captured later.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// Transport-level or provider-side outage. Safe to retry.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl PaymentError {
    /// Maps a reqwest transport error. Anything that did not produce a
    /// provider verdict is an outage, never a decline.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        PaymentError::Unavailable(err.to_string())
    }
}

/// A successful authorization: funds reserved, nothing settled yet.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Provider-side transaction reference. Recorded durably before capture
    /// is attempted so a retry can complete the same transaction.
    pub provider_txn_id: String,
}

/// A finalized capture.
#[derive(Debug, Clone)]
pub struct Capture {
    pub provider_txn_id: String,
    pub captured_at: DateTime<Utc>,
}

/// The narrow contract the settlement orchestrator is written against.
///
/// Providers that collapse authorize+capture into one externally-confirmed
/// step (the hosted payment element) implement `authorize` as verification of
/// the client-confirmed intent and return its reference.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProviderKind;

    async fn authorize(
        &self,
        amount: Decimal,
        currency: &str,
        payment_method_ref: &str,
    ) -> Result<Authorization, PaymentError>;

    async fn capture(&self, provider_txn_id: &str) -> Result<Capture, PaymentError>;
}

/// Builds the configured provider. Called once at startup; the orchestrator
/// only ever sees the trait object.
pub fn build_gateway(cfg: &PaymentConfig) -> Arc<dyn PaymentGateway> {
    match cfg.provider {
        PaymentProviderKind::Card => Arc::new(CardGateway::new(cfg)),
        PaymentProviderKind::Paypal => Arc::new(PayPalGateway::new(cfg)),
        PaymentProviderKind::PaymentElement => Arc::new(PaymentElementGateway::new(cfg)),
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
