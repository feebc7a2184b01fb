use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use crate::report::ReportError;

/// Value shipped in the sample config file; treated the same as "unset".
pub const PLACEHOLDER_WEBHOOK_URL: &str = "YOUR_WEBHOOK_URL_GOES_HERE";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a finished report goes.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, date: &str, body: &str) -> Result<(), ReportError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub token: String,
}

impl WebhookConfig {
    pub fn is_configured(&self) -> bool {
        let url = self.url.trim();
        !url.is_empty() && url != PLACEHOLDER_WEBHOOK_URL
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    token: &'a str,
    date: &'a str,
    body: &'a str,
}

pub struct WebhookSink {
    client: Client,
    config: WebhookConfig,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ReportSink for WebhookSink {
    async fn deliver(&self, date: &str, body: &str) -> Result<(), ReportError> {
        if !self.config.is_configured() {
            error!("Webhook URL is not configured. Cannot send report.");
            return Err(ReportError::NotConfigured);
        }

        let payload = WebhookPayload {
            token: &self.config.token,
            date,
            body,
        };
        let res = self
            .client
            .post(self.config.url.trim())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("webhook post failed: {e}");
                ReportError::Network(e.to_string())
            })?;

        let status = res.status();
        if status.is_success() {
            info!("report for {date} delivered");
            return Ok(());
        }
        let reason = status.canonical_reason().unwrap_or("");
        error!("webhook rejected report for {date}: {status}");
        Err(ReportError::Server(
            format!("{} {reason}", status.as_u16()).trim_end().to_string(),
        ))
    }
}
