// =============================================================================
// Notification Sink — best-effort operator alerts
// =============================================================================
//
// Delivery failures are logged and swallowed; a dead webhook must never
// change trading behavior.
// =============================================================================

use async_trait::async_trait;
use tracing::{debug, warn};

/// Best-effort operator notification channel.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Posts messages to a Discord webhook.
pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Build from `HELIOS_DISCORD_WEBHOOK_URL` if set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("HELIOS_DISCORD_WEBHOOK_URL").ok()?;
        if url.trim().is_empty() {
            return None;
        }
        Some(Self::new(url))
    }
}

#[async_trait]
impl NotifySink for DiscordNotifier {
    async fn notify(&self, message: &str) {
        let payload = serde_json::json!({ "content": message });
        match self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("notification delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(error = %e, "notification delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for DiscordNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordNotifier")
            .field("webhook_url", &"***")
            .finish()
    }
}

/// Drops every message; used when no webhook is configured.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl NotifySink for NullNotifier {
    async fn notify(&self, _message: &str) {}
}
