use crate::domain::ports::{Checkout, ProcessorClient};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://api.sumup.com";

/// Checkout verification against the SumUp API.
///
/// Only reads checkout state; creating hosted checkouts is a transport
/// concern outside the engine.
pub struct SumUpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SumUpClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    id: String,
    status: String,
    amount: Decimal,
}

impl CheckoutResponse {
    fn into_checkout(self) -> Checkout {
        Checkout {
            paid: matches!(self.status.as_str(), "PAID" | "SUCCESSFUL"),
            id: self.id,
            amount: self.amount,
        }
    }
}

#[async_trait]
impl ProcessorClient for SumUpClient {
    async fn fetch_checkout(&self, checkout_id: &str) -> Result<Checkout> {
        let url = format!("{}/v0.1/checkouts/{}", self.base_url, checkout_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(checkout_id, status = %response.status(), "checkout lookup rejected");
            return Err(PaymentError::VerificationFailed(format!(
                "processor returned {} for checkout {checkout_id}",
                response.status()
            )));
        }

        let body: CheckoutResponse = response.json().await?;
        Ok(body.into_checkout())
    }
}

/// Fixed checkout table, used by tests and the offline replay binary where
/// the input itself is the trusted record of what the processor settled.
#[derive(Default)]
pub struct StaticProcessor {
    checkouts: Mutex<HashMap<String, Checkout>>,
}

impl StaticProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a checkout the processor will report as paid.
    pub fn insert_paid(&self, checkout_id: &str, amount: Decimal) {
        self.checkouts.lock().unwrap().insert(
            checkout_id.to_string(),
            Checkout {
                id: checkout_id.to_string(),
                paid: true,
                amount,
            },
        );
    }

    /// Registers a checkout the processor will report as unpaid.
    pub fn insert_unpaid(&self, checkout_id: &str, amount: Decimal) {
        self.checkouts.lock().unwrap().insert(
            checkout_id.to_string(),
            Checkout {
                id: checkout_id.to_string(),
                paid: false,
                amount,
            },
        );
    }
}

#[async_trait]
impl ProcessorClient for StaticProcessor {
    async fn fetch_checkout(&self, checkout_id: &str) -> Result<Checkout> {
        self.checkouts
            .lock()
            .unwrap()
            .get(checkout_id)
            .cloned()
            .ok_or_else(|| {
                PaymentError::VerificationFailed(format!("unknown checkout {checkout_id}"))
            })
    }
}
