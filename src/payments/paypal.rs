use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use super::{Authorization, Capture, PaymentError, PaymentGateway};
use crate::config::{PaymentConfig, PaymentProviderKind};

/// PayPal Orders API client: authorize creates a provider-side order, capture
/// settles it. The order id PayPal returns is the transaction reference the
/// orchestrator persists between the two calls.
pub struct PayPalGateway {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

#[derive(Deserialize)]
struct PayPalOrder {
    id: String,
    status: String,
}

impl PayPalGateway {
    pub fn new(cfg: &PaymentConfig) -> Self {
        Self {
            http: super::http_client(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            access_token: cfg.api_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn provider(&self) -> PaymentProviderKind {
        PaymentProviderKind::Paypal
    }

    #[instrument(skip(self, payment_method_ref), fields(provider = "paypal"))]
    async fn authorize(
        &self,
        amount: Decimal,
        currency: &str,
        payment_method_ref: &str,
    ) -> Result<Authorization, PaymentError> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": amount.to_string(),
                },
            }],
            "payment_source": { "token": { "id": payment_method_ref, "type": "BILLING_AGREEMENT" } },
        });

        let resp = self
            .http
            .post(format!("{}/v2/checkout/orders", self.endpoint))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(PaymentError::from_transport)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable(format!(
                "paypal returned {}",
                status
            )));
        }
        if status.is_client_error() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Declined(format!(
                "paypal rejected order: {}",
                detail
            )));
        }

        let order: PayPalOrder = resp.json().await.map_err(PaymentError::from_transport)?;
        info!(paypal_order = %order.id, status = %order.status, "paypal order created");
        Ok(Authorization {
            provider_txn_id: order.id,
        })
    }

    #[instrument(skip(self), fields(provider = "paypal"))]
    async fn capture(&self, provider_txn_id: &str) -> Result<Capture, PaymentError> {
        let resp = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.endpoint, provider_txn_id
            ))
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(PaymentError::from_transport)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable(format!(
                "paypal returned {}",
                status
            )));
        }
        if status.is_client_error() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(PaymentError::CaptureFailed(format!(
                "paypal capture rejected: {}",
                detail
            )));
        }

        let order: PayPalOrder = resp.json().await.map_err(PaymentError::from_transport)?;
        if order.status != "COMPLETED" {
            return Err(PaymentError::CaptureFailed(format!(
                "paypal order {} in state {}",
                order.id, order.status
            )));
        }

        info!(paypal_order = %order.id, "paypal order captured");
        Ok(Capture {
            provider_txn_id: order.id,
            captured_at: Utc::now(),
        })
    }
}
