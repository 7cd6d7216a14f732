//! Webhook delivery for schedule outcomes.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use pageshot_models::WebhookEvent;

/// Delivers schedule events to an external endpoint. Delivery is fire and
/// forget: failures are logged, never propagated.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, url: &str, event: &WebhookEvent);
}

/// HTTP notifier posting events as JSON.
pub struct HttpWebhookNotifier {
    client: reqwest::Client,
}

impl HttpWebhookNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpWebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, url: &str, event: &WebhookEvent) {
        match self.client.post(url).json(event).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(url, status = %response.status(), "webhook endpoint rejected event");
            }
            Ok(_) => debug!(url, "webhook delivered"),
            Err(err) => warn!(url, error = %err, "webhook delivery failed"),
        }
    }
}

/// Notifier that drops every event, for setups without webhooks.
pub struct NullWebhookNotifier;

#[async_trait]
impl WebhookNotifier for NullWebhookNotifier {
    async fn notify(&self, url: &str, _event: &WebhookEvent) {
        debug!(url, "webhook delivery disabled, dropping event");
    }
}
