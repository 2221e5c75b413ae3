//! Push delivery seam.
//!
//! The fanout engine only knows [`PushProvider`]; FCM is the production
//! implementation and tests inject a recording fake.

pub mod fcm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use fcm::FcmClient;

/// Payload delivered to a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    /// Free-form key/value pairs; providers only carry string values
    pub data: BTreeMap<String, String>,
}

/// Provider-reported cause of a per-token failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushErrorCode {
    InvalidToken,
    Unregistered,
    Transient,
}

impl PushErrorCode {
    /// Tokens failing with these codes will never succeed again and are pruned
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushErrorCode::InvalidToken | PushErrorCode::Unregistered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub message_id: Option<String>,
    pub error: Option<PushErrorCode>,
}

impl TokenResult {
    pub fn delivered(token: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(token: impl Into<String>, code: PushErrorCode) -> Self {
        Self {
            token: token.into(),
            message_id: None,
            error: Some(code),
        }
    }
}

/// Per-token outcome of one multicast request, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub responses: Vec<TokenResult>,
}

impl MulticastResult {
    pub fn from_responses(responses: Vec<TokenResult>) -> Self {
        let failure_count = responses.iter().filter(|r| r.error.is_some()).count();
        Self {
            success_count: responses.len() - failure_count,
            failure_count,
            responses,
        }
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push provider authentication failed: {0}")]
    Auth(String),

    #[error("push request failed: {0}")]
    Transport(String),

    #[error("push rejected for token ({code:?}): {message}")]
    Rejected { code: PushErrorCode, message: String },

    #[error("unexpected push provider response: {0}")]
    InvalidResponse(String),

    #[error("push provider did not answer in time")]
    Timeout,
}

impl PushError {
    /// Error code attributable to the target token
    pub fn code(&self) -> PushErrorCode {
        match self {
            PushError::Rejected { code, .. } => *code,
            _ => PushErrorCode::Transient,
        }
    }
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PushError::Timeout
        } else {
            PushError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Delivers to one device and returns the provider's message id
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String, PushError>;

    /// Delivers to up to one batch of devices. An `Err` means the whole
    /// request failed; per-token failures are reported in the result.
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastResult, PushError>;
}
