//! Webhook delivery of diagnostic results.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::JobError;

/// Overall outcome reported to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Probe ran and no hop lost packets.
    Success,
    /// Probe ran and at least one hop lost packets.
    Warning,
    /// Probe could not produce a report.
    Error,
}

/// Body of the result webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub message: String,
    pub username: String,
    pub event_name: String,
    pub status: Status,
}

/// Sends result webhooks. One attempt per payload.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Result<Self, JobError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::Delivery(e.to_string()))?;

        Ok(Self { client })
    }

    /// POST `payload` as JSON to `url`.
    ///
    /// Returns the response status on 2xx; anything else is an error.
    pub async fn deliver(
        &self,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<StatusCode, JobError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JobError::Delivery(format!("timed out posting to {}", url))
                } else {
                    JobError::Delivery(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Webhook {} answered {}: {}", url, status, body);
            return Err(JobError::Rejected(status));
        }

        Ok(status)
    }
}
