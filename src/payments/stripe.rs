//! HTTP client for the card processor's payment intents API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{IntentHandle, IntentRequest, PaymentProcessor};
use crate::{Result, StoreError};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const API_VERSION: &str = "2022-11-15";

#[derive(Deserialize)]
struct PaymentIntentResponse { id: String, client_secret: Option<String> }

#[derive(Deserialize)]
struct ErrorResponse { error: ErrorDetail }

#[derive(Deserialize)]
struct ErrorDetail { message: Option<String>, code: Option<String> }

pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self { client: Client::new(), secret_key: secret_key.into(), api_base: api_base.into().trim_end_matches('/').to_string() }
    }
}

/// Form body for `POST /v1/payment_intents`.
fn intent_form(request: &IntentRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), request.amount_minor.to_string()),
        ("currency".to_string(), request.currency.clone()),
        ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
    ];
    form.extend(request.metadata.iter().map(|(k, v)| (format!("metadata[{}]", k), v.clone())));
    form
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<IntentHandle> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Stripe-Version", API_VERSION)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&intent_form(request))
            .send()
            .await
            .map_err(|e| StoreError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|b| b.error.message.or(b.error.code))
                .unwrap_or_else(|| status.to_string());
            return Err(StoreError::Upstream(detail));
        }

        let intent: PaymentIntentResponse = response.json().await.map_err(|e| StoreError::Upstream(e.to_string()))?;
        let client_secret = intent.client_secret.ok_or_else(|| StoreError::Upstream("intent has no client secret".into()))?;
        Ok(IntentHandle { client_secret, payment_intent_id: intent.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_form_fields() {
        let request = IntentRequest {
            amount_minor: 5000,
            currency: "usd".into(),
            metadata: vec![("order_id".into(), "o1".into()), ("user_id".into(), "u1".into())],
            idempotency_key: "order-o1".into(),
        };
        let form = intent_form(&request);
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("amount"), Some("5000"));
        assert_eq!(get("automatic_payment_methods[enabled]"), Some("true"));
        assert_eq!(get("metadata[order_id]"), Some("o1"));
        assert_eq!(get("metadata[user_id]"), Some("u1"));
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let client = StripeClient::new("sk_test", "http://localhost:12111/");
        assert_eq!(client.api_base, "http://localhost:12111");
    }
}
