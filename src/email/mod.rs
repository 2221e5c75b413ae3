//! Outbound transactional email.

mod smtp;
pub mod templates;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use smtp::SmtpMailer;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build email: {0}")]
    Build(String),

    #[error("failed to send email: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError>;
}

pub type DynEmailSender = Arc<dyn EmailSender>;
