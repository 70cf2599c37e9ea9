//! REST client for the payment gateway
//!
//! Form-encoded requests with bearer auth, matching the gateway's API
//! conventions. Amounts are integers in minor currency units throughout.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::types::{PaymentIntent, Refund, Transfer};
use super::{GatewayError, PaymentGateway, RefundRequest, TransferRequest};

/// Error body returned by the gateway: `{ "error": { "message", "type" } }`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetails {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

/// Stripe REST API adapter
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(api_base: String, secret_key: String) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Ok(Self {
            http,
            api_base,
            secret_key,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.api_base, path);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Self::decode(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.api_base, path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| {
                    format!(
                        "{} ({})",
                        b.error.message.unwrap_or_else(|| "unknown error".to_string()),
                        b.error.error_type.unwrap_or_else(|| status.to_string()),
                    )
                })
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

            // 5xx from the gateway is worth retrying; 4xx is a deterministic
            // rejection of this request.
            return if status.is_server_error() {
                Err(GatewayError::Http(message))
            } else {
                Err(GatewayError::Api(message))
            };
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        self.get(&format!("/v1/payment_intents/{}", id)).await
    }

    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, GatewayError> {
        let params = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency),
            ("destination".to_string(), request.destination),
            (
                "source_transaction".to_string(),
                request.source_transaction,
            ),
            ("description".to_string(), request.description),
            ("metadata[booking_id]".to_string(), request.booking_id),
        ];

        self.post_form("/v1/transfers", &params).await
    }

    async fn create_refund(&self, request: RefundRequest) -> Result<Refund, GatewayError> {
        let mut params = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("payment_intent".to_string(), request.payment_intent),
            ("metadata[booking_id]".to_string(), request.booking_id),
        ];
        if let Some(reason) = request.reason {
            params.push(("reason".to_string(), reason));
        }

        self.post_form("/v1/refunds", &params).await
    }
}
