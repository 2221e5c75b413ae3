//! Payment gateway seam.
//!
//! Settlement talks to the gateway only through [`PaymentProvider`], so the
//! PayPal client can be swapped for a fake in tests.

pub mod paypal;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::order::CardDetails;

pub use paypal::PayPalClient;

/// One line of the purchase as shown on the gateway's approval page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub name: String,
    pub quantity: i32,
    pub unit_amount: Decimal,
}

/// What the gateway is asked to charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrderRequest {
    /// Our order number, echoed back by the gateway
    pub reference_id: String,
    pub currency: String,
    pub items: Vec<PaymentLine>,
    pub total: Decimal,
}

/// A gateway-side order awaiting buyer approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub id: String,
    pub status: String,
    pub approval_url: Option<String>,
}

/// Result of a capture call that reached the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOutcome {
    pub provider_order_id: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub card: Option<CardDetails>,
}

impl CaptureOutcome {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("COMPLETED")
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment gateway is not configured")]
    NotConfigured,

    #[error("payment gateway request failed: {0}")]
    Transport(String),

    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected payment gateway response: {0}")]
    InvalidResponse(String),

    #[error("payment gateway did not answer in time")]
    Timeout,
}

/// PayPal issue code for a second capture of the same order
pub const ORDER_ALREADY_CAPTURED: &str = "ORDER_ALREADY_CAPTURED";

impl PaymentError {
    /// The gateway refused because the funds were already captured
    pub fn is_already_captured(&self) -> bool {
        matches!(self, PaymentError::Rejected { message, .. } if message == ORDER_ALREADY_CAPTURED)
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::Timeout
        } else {
            PaymentError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a gateway order the buyer still has to approve
    async fn create_order(
        &self,
        request: &PaymentOrderRequest,
    ) -> Result<ProviderOrder, PaymentError>;

    /// Captures the funds of an approved gateway order
    async fn capture_order(&self, provider_order_id: &str) -> Result<CaptureOutcome, PaymentError>;
}
