use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::{MulticastResult, PushError, PushErrorCode, PushMessage, PushProvider, TokenResult};
use crate::config::FcmConfig;

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// In-flight sends per multicast batch
const SEND_CONCURRENCY: usize = 32;

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Firebase Cloud Messaging HTTP v1 client authenticated with a service account
pub struct FcmClient {
    client: reqwest::Client,
    config: FcmConfig,
    signing_key: EncodingKey,
    token: RwLock<Option<CachedToken>>,
}

impl FcmClient {
    /// Fails when the service-account key is not a valid RSA PEM, which puts
    /// the caller in push-disabled mode
    pub fn new(config: FcmConfig, timeout: Duration) -> Result<Self, PushError> {
        let signing_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|e| PushError::Auth(format!("invalid service account key: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            signing_key,
            token: RwLock::new(None),
        })
    }

    fn assertion(&self) -> Result<String, PushError> {
        let now = chrono::Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: &self.config.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.config.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| PushError::Auth(e.to_string()))
    }

    async fn access_token(&self) -> Result<String, PushError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.config.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("token exchange returned {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::InvalidResponse(e.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *slot = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!("refreshed FCM access token");
        Ok(token.access_token)
    }

    async fn send_with_token(
        &self,
        access_token: &str,
        device_token: &str,
        message: &PushMessage,
    ) -> Result<String, PushError> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.config.api_base.trim_end_matches('/'),
            self.config.project_id
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&message_body(device_token, message))
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return payload
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| PushError::InvalidResponse("message name missing".to_string()));
        }

        let code = classify_error(status.as_u16(), &payload);
        let message = payload
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Err(PushError::Rejected { code, message })
    }
}

#[async_trait]
impl PushProvider for FcmClient {
    #[instrument(skip(self, token, message))]
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String, PushError> {
        let access_token = self.access_token().await?;
        self.send_with_token(&access_token, token, message).await
    }

    #[instrument(skip(self, tokens, message), fields(tokens = tokens.len()))]
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastResult, PushError> {
        let access_token = self.access_token().await?;
        let access_token = access_token.as_str();

        // owned tokens keep the per-send futures free of borrowed lifetimes
        let responses: Vec<TokenResult> = stream::iter(tokens.to_vec())
            .map(|token| async move {
                match self.send_with_token(access_token, &token, message).await {
                    Ok(id) => TokenResult::delivered(token, id),
                    Err(err) => {
                        warn!(error = %err, "push to device failed");
                        TokenResult::failed(token, err.code())
                    }
                }
            })
            .buffered(SEND_CONCURRENCY)
            .collect()
            .await;

        Ok(MulticastResult::from_responses(responses))
    }
}

pub(crate) fn message_body(token: &str, message: &PushMessage) -> Value {
    let mut notification = json!({
        "title": message.title,
        "body": message.body,
    });
    if let Some(image) = &message.image {
        notification["image"] = json!(image);
    }

    json!({
        "message": {
            "token": token,
            "notification": notification,
            "data": message.data,
            "android": { "priority": "high" },
            "apns": { "payload": { "aps": { "sound": "default" } } },
        }
    })
}

/// Maps an FCM v1 error body onto the codes the fanout engine acts on
pub(crate) fn classify_error(http_status: u16, payload: &Value) -> PushErrorCode {
    let fcm_code = payload
        .pointer("/error/details")
        .and_then(Value::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|d| d.get("errorCode").and_then(Value::as_str))
        });
    let status = payload.pointer("/error/status").and_then(Value::as_str);
    let message = payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match (fcm_code, status) {
        (Some("UNREGISTERED"), _) => PushErrorCode::Unregistered,
        (_, Some("NOT_FOUND")) => PushErrorCode::Unregistered,
        (Some("INVALID_ARGUMENT"), _) | (_, Some("INVALID_ARGUMENT"))
            if message.contains("token") =>
        {
            PushErrorCode::InvalidToken
        }
        _ if http_status == 404 => PushErrorCode::Unregistered,
        _ => PushErrorCode::Transient,
    }
}
