//! Catalog gateway: read-only lookup of authoritative product data.
//!
//! Checkout calls this to re-price and re-check every cart line before any
//! payment call. It is deliberately not used for cart display pricing; the
//! cart keeps its own snapshots.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Authoritative product view for revalidation.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub price: Decimal,
    pub in_stock: bool,
}

#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Returns `None` for products the catalog no longer knows about.
    /// Transport failures surface as retryable errors, not as "unavailable
    /// item" verdicts.
    async fn get_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, ServiceError>;
}

/// HTTP client for the catalog service.
pub struct HttpCatalogGateway {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpCatalogGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CatalogGateway for HttpCatalogGateway {
    #[instrument(skip(self))]
    async fn get_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, ServiceError> {
        let resp = self
            .http
            .get(format!("{}/api/products/{}", self.endpoint, id))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("catalog lookup: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "catalog returned {}",
                resp.status()
            )));
        }

        let product = resp
            .json::<CatalogProduct>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("catalog decode: {}", e)))?;
        Ok(Some(product))
    }
}
