//! Outbound notification collaborator used by the `send_email` tool.

pub mod relay;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::credential::CredentialError;

pub use relay::HttpEmailSender;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email delivery is not configured")]
    NotConfigured,

    #[error("Email relay rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Email transport error: {0}")]
    Transport(String),

    #[error("Email credential error: {0}")]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Sender used when no relay endpoint is configured.
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, _message: &EmailMessage) -> Result<(), EmailError> {
        Err(EmailError::NotConfigured)
    }
}
