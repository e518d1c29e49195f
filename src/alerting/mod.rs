use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub mod webhook;

pub use webhook::WebhookSender;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Alert endpoint returned status {0}")]
    UnexpectedStatus(u16),
}

/// Delivery collaborator for backup failure alerts. Callers hand over a
/// subject and body; how they reach an operator is the sender's business.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), SenderError>;
}

/// Fire-and-forget dispatch. Delivery failures are logged and swallowed:
/// an alert that cannot be sent must never fail the ingest that raised it.
pub fn dispatch(sender: Option<Arc<dyn AlertSender>>, subject: String, body: String) {
    let Some(sender) = sender else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = sender.send(&subject, &body).await {
            warn!(subject = %subject, error = %e, "alert dispatch failed");
        }
    });
}
