use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{Authorization, Capture, PaymentError, PaymentGateway};
use crate::config::{PaymentConfig, PaymentProviderKind};

/// Hosted payment-element flow. The client confirms the payment intent
/// directly with the provider before checkout reaches this service, so
/// `authorize` does not create a new charge: it verifies the intent the
/// client hands us (`payment_method_ref` is the intent id) and passes its
/// reference through. `capture` settles the intent unless the provider
/// already did.
pub struct PaymentElementGateway {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
}

impl PaymentElementGateway {
    pub fn new(cfg: &PaymentConfig) -> Self {
        Self {
            http: super::http_client(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        }
    }

    async fn fetch_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        let resp = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.endpoint, intent_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(PaymentError::from_transport)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable(format!(
                "payment element provider returned {}",
                status
            )));
        }
        if status.is_client_error() {
            return Err(PaymentError::Declined(format!(
                "unknown payment intent {}",
                intent_id
            )));
        }
        resp.json().await.map_err(PaymentError::from_transport)
    }
}

#[async_trait]
impl PaymentGateway for PaymentElementGateway {
    fn provider(&self) -> PaymentProviderKind {
        PaymentProviderKind::PaymentElement
    }

    #[instrument(skip(self), fields(provider = "payment-element"))]
    async fn authorize(
        &self,
        _amount: Decimal,
        _currency: &str,
        payment_method_ref: &str,
    ) -> Result<Authorization, PaymentError> {
        let intent = self.fetch_intent(payment_method_ref).await?;

        match intent.status.as_str() {
            // Client-side confirmation already reserved (or settled) funds.
            "requires_capture" | "succeeded" => {
                info!(intent = %intent.id, status = %intent.status, "payment intent verified");
                Ok(Authorization {
                    provider_txn_id: intent.id,
                })
            }
            "processing" => Err(PaymentError::Unavailable(format!(
                "payment intent {} still processing",
                intent.id
            ))),
            other => Err(PaymentError::Declined(format!(
                "payment intent {} not confirmed (state {})",
                intent.id, other
            ))),
        }
    }

    #[instrument(skip(self), fields(provider = "payment-element"))]
    async fn capture(&self, provider_txn_id: &str) -> Result<Capture, PaymentError> {
        let intent = self.fetch_intent(provider_txn_id).await?;
        if intent.status == "succeeded" {
            // Single-step providers settle on confirmation; nothing to do.
            warn!(intent = %intent.id, "intent already settled; treating capture as complete");
            return Ok(Capture {
                provider_txn_id: intent.id,
                captured_at: Utc::now(),
            });
        }

        let resp = self
            .http
            .post(format!(
                "{}/v1/payment_intents/{}/capture",
                self.endpoint, provider_txn_id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(PaymentError::from_transport)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable(format!(
                "payment element provider returned {}",
                status
            )));
        }
        let body: PaymentIntent = resp.json().await.map_err(PaymentError::from_transport)?;
        if status.is_client_error() || body.status != "succeeded" {
            return Err(PaymentError::CaptureFailed(format!(
                "payment intent {} in state {}",
                body.id, body.status
            )));
        }

        info!(intent = %body.id, "payment intent captured");
        Ok(Capture {
            provider_txn_id: body.id,
            captured_at: Utc::now(),
        })
    }
}
