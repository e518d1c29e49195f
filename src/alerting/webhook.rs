use async_trait::async_trait;
use reqwest::{header, Client};

use super::{AlertSender, SenderError};

/// Posts alerts as a small JSON document to a configured webhook URL.
pub struct WebhookSender {
    client: Client,
    url: String,
}

impl WebhookSender {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSender for WebhookSender {
    async fn send(&self, subject: &str, body: &str) -> Result<(), SenderError> {
        let payload = serde_json::json!({
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SenderError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
