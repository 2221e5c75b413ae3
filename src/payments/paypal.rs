use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::{CaptureOutcome, PaymentError, PaymentOrderRequest, PaymentProvider, ProviderOrder};
use crate::config::PayPalConfig;
use crate::entities::order::CardDetails;
use crate::services::pricing::round_money;

/// Refresh the access token this long before PayPal expires it
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const MAX_ITEM_NAME_LEN: usize = 127;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// PayPal Orders v2 REST client
pub struct PayPalClient {
    client: reqwest::Client,
    config: PayPalConfig,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig, timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // another task may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *slot = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!("refreshed PayPal access token");
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentProvider for PayPalClient {
    #[instrument(skip(self, request), fields(reference_id = %request.reference_id))]
    async fn create_order(
        &self,
        request: &PaymentOrderRequest,
    ) -> Result<ProviderOrder, PaymentError> {
        let token = self.access_token().await?;
        let body = create_order_body(request, &self.config);

        let response = self
            .client
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .header("PayPal-Request-Id", &request.reference_id)
            .json(&body)
            .send()
            .await?;
        let payload: Value = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        parse_create_response(&payload)
    }

    #[instrument(skip(self))]
    async fn capture_order(&self, provider_order_id: &str) -> Result<CaptureOutcome, PaymentError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.url(&format!(
                "/v2/checkout/orders/{}/capture",
                provider_order_id
            )))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        let payload: Value = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        Ok(parse_capture_response(provider_order_id, &payload))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body
        .get("details")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("issue"))
        .or_else(|| body.get("name"))
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    warn!(status = status.as_u16(), %message, "PayPal request rejected");

    Err(PaymentError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Cents with exactly two decimals, the form PayPal expects
pub(crate) fn format_amount(amount: Decimal) -> String {
    let mut value = round_money(amount);
    value.rescale(2);
    value.to_string()
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_ITEM_NAME_LEN).collect()
}

pub(crate) fn create_order_body(request: &PaymentOrderRequest, config: &PayPalConfig) -> Value {
    let currency = request.currency.as_str();
    let items: Vec<Value> = request
        .items
        .iter()
        .map(|item| {
            json!({
                "name": truncate_name(&item.name),
                "quantity": item.quantity.to_string(),
                "unit_amount": {
                    "currency_code": currency,
                    "value": format_amount(item.unit_amount),
                },
            })
        })
        .collect();
    let total = format_amount(request.total);

    json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "reference_id": request.reference_id,
            "amount": {
                "currency_code": currency,
                "value": total,
                "breakdown": {
                    "item_total": { "currency_code": currency, "value": total },
                },
            },
            "items": items,
        }],
        "application_context": {
            "brand_name": config.brand_name,
            "return_url": config.return_url,
            "cancel_url": config.cancel_url,
            "user_action": "PAY_NOW",
            "shipping_preference": "NO_SHIPPING",
        },
    })
}

pub(crate) fn parse_create_response(payload: &Value) -> Result<ProviderOrder, PaymentError> {
    let id = payload
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::InvalidResponse("order id missing".to_string()))?;
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("CREATED");

    let approval_url = payload
        .get("links")
        .and_then(Value::as_array)
        .and_then(|links| {
            links.iter().find(|link| {
                matches!(
                    link.get("rel").and_then(Value::as_str),
                    Some("approve") | Some("payer-action")
                )
            })
        })
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ProviderOrder {
        id: id.to_string(),
        status: status.to_string(),
        approval_url,
    })
}

pub(crate) fn parse_capture_response(provider_order_id: &str, payload: &Value) -> CaptureOutcome {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();

    let transaction_id = payload
        .pointer("/purchase_units/0/payments/captures/0/id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let card = payload.pointer("/payment_source/card").and_then(|card| {
        let last4 = card.get("last_digits").and_then(Value::as_str)?;
        Some(CardDetails {
            last4: last4.to_string(),
            brand: card
                .get("brand")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string(),
            expiry: card
                .get("expiry")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    });

    CaptureOutcome {
        provider_order_id: payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(provider_order_id)
            .to_string(),
        status,
        transaction_id,
        card,
    }
}
