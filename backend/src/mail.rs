use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::MailConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Mail transport returned unexpected response code {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A composed outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub text_body: String,
    pub message_stream: String,
}

/// Outbound mail delivery.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError>;
}

/// Client for the Postmark email API.
pub struct PostmarkClient {
    http_client: Client,
    base_url: String,
    server_token: String,
}

impl PostmarkClient {
    pub fn new(http_client: Client, config: &MailConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            server_token: config.token.clone(),
        }
    }
}

#[async_trait]
impl MailTransport for PostmarkClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let url = format!("{}/email", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .header("X-Postmark-Server-Token", &self.server_token)
            .json(message)
            .send()
            .await
            .map_err(|e| MailError::RequestFailed(e.to_string()))?;

        // Only 200 means the message was accepted.
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        tracing::info!(subject = %message.subject, "Sent fulfillment notice");
        Ok(())
    }
}
