use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{Authorization, Capture, PaymentError, PaymentGateway};
use crate::config::{PaymentConfig, PaymentProviderKind};

/// Card processor client. The shopper's card never reaches this service;
/// `payment_method_ref` is the processor token minted by the frontend.
pub struct CardGateway {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChargeRequest<'a> {
    amount: Decimal,
    currency: &'a str,
    source: &'a str,
    /// Authorize only; settlement happens in the capture call.
    capture: bool,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
    #[serde(default)]
    decline_reason: Option<String>,
}

impl CardGateway {
    pub fn new(cfg: &PaymentConfig) -> Self {
        Self {
            http: super::http_client(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        }
    }

    async fn read_charge(&self, resp: reqwest::Response) -> Result<ChargeResponse, PaymentError> {
        let status = resp.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable(format!(
                "card processor returned {}",
                status
            )));
        }
        let body: ChargeResponse = resp.json().await.map_err(PaymentError::from_transport)?;
        if status.is_client_error() || body.status == "declined" {
            let reason = body
                .decline_reason
                .unwrap_or_else(|| "charge rejected".to_string());
            return Err(PaymentError::Declined(reason));
        }
        Ok(body)
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn provider(&self) -> PaymentProviderKind {
        PaymentProviderKind::Card
    }

    #[instrument(skip(self, payment_method_ref), fields(provider = "card"))]
    async fn authorize(
        &self,
        amount: Decimal,
        currency: &str,
        payment_method_ref: &str,
    ) -> Result<Authorization, PaymentError> {
        let resp = self
            .http
            .post(format!("{}/v1/charges", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&ChargeRequest {
                amount,
                currency,
                source: payment_method_ref,
                capture: false,
            })
            .send()
            .await
            .map_err(PaymentError::from_transport)?;

        let charge = self.read_charge(resp).await?;
        info!(txn = %charge.id, "card charge authorized");
        Ok(Authorization {
            provider_txn_id: charge.id,
        })
    }

    #[instrument(skip(self), fields(provider = "card"))]
    async fn capture(&self, provider_txn_id: &str) -> Result<Capture, PaymentError> {
        let resp = self
            .http
            .post(format!(
                "{}/v1/charges/{}/capture",
                self.endpoint, provider_txn_id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(PaymentError::from_transport)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable(format!(
                "card processor returned {}",
                status
            )));
        }
        let body: ChargeResponse = resp.json().await.map_err(PaymentError::from_transport)?;
        if status.is_client_error() || body.status != "captured" {
            return Err(PaymentError::CaptureFailed(format!(
                "charge {} in state {}",
                body.id, body.status
            )));
        }

        info!(txn = %body.id, "card charge captured");
        Ok(Capture {
            provider_txn_id: body.id,
            captured_at: Utc::now(),
        })
    }
}
