//! Webhook notification of received mail.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Default bound on a whole webhook request, response included.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The request could not be sent or the response not read.
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with a non-success status.
    #[error("Webhook returned HTTP {0}")]
    Status(u16),
}

/// Announces a received message to an outside party.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `raw` to `webhook_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification was not accepted.
    async fn notify(&self, webhook_url: &str, raw: &str) -> Result<(), NotifyError>;
}

/// Body posted to the webhook.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Posts the raw message as `{"content": ...}` JSON.
///
/// One attempt per message; the response body is ignored. Every request
/// is bounded by a timeout, so a webhook that never answers fails the
/// notification instead of holding the SMTP transaction open.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    /// Creates a notifier using [`DEFAULT_WEBHOOK_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, NotifyError> {
        Self::with_timeout(DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Creates a notifier whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Creates a notifier that sends through `http_client`.
    #[must_use]
    pub const fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, webhook_url: &str, raw: &str) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(webhook_url)
            .json(&WebhookPayload { content: raw })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        tracing::debug!("Webhook accepted notification ({status})");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let raw = "Subject: Hi\r\n\r\n\"quoted\"";
        let json = serde_json::to_value(WebhookPayload { content: raw }).unwrap();
        assert_eq!(json, serde_json::json!({ "content": raw }));
    }

    #[tokio::test]
    async fn test_invalid_url_is_http_error() {
        let notifier = WebhookNotifier::new().unwrap();
        let err = notifier.notify("not a url", "x").await.unwrap_err();
        assert!(matches!(err, NotifyError::Http(_)));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(NotifyError::Status(500).to_string(), "Webhook returned HTTP 500");
    }
}
