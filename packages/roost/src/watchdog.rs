use async_trait::async_trait;
use panel_client::PowerState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ManagedInstance;
use crate::panel::PanelApi;

/// Where offline alerts go. The webhook sink is the production path; the log
/// sink stands in when no webhook is configured.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn offline_alert(&self, instance: &ManagedInstance) -> anyhow::Result<()>;
}

/// POSTs a chat-style `{"content": ...}` payload to a webhook URL.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn offline_alert(&self, instance: &ManagedInstance) -> anyhow::Result<()> {
        let body = json!({
            "content": format!("⚠️ **{}** (`{}`) is offline", instance.name, instance.id),
        });
        let res = self.http.post(&self.url).json(&body).send().await?;
        res.error_for_status()?;
        Ok(())
    }
}

/// Fallback sink: the alert is only as loud as the log.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn offline_alert(&self, instance: &ManagedInstance) -> anyhow::Result<()> {
        warn!(instance = %instance.id, name = %instance.name, "instance is offline");
        Ok(())
    }
}

/// Periodic fleet sweep: every interval, check each managed instance and
/// alert when it reports offline. Alerts are raised on every offline sweep,
/// not deduplicated, so a silence means recovery.
pub struct Watchdog {
    panel: Arc<dyn PanelApi>,
    sink: Arc<dyn AlertSink>,
    instances: Vec<ManagedInstance>,
    interval: Duration,
}

impl Watchdog {
    pub fn new(
        panel: Arc<dyn PanelApi>,
        sink: Arc<dyn AlertSink>,
        instances: Vec<ManagedInstance>,
        interval: Duration,
    ) -> Self {
        Self {
            panel,
            sink,
            instances,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                instances = self.instances.len(),
                interval_secs = self.interval.as_secs(),
                "fleet watchdog started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One pass over the fleet. A failure for one instance never aborts the
    /// rest of the sweep.
    async fn sweep(&self) {
        for instance in &self.instances {
            match self.panel.resources(&instance.id).await {
                Ok(snapshot) => {
                    debug!(instance = %instance.id, state = %snapshot.state, "watchdog check");
                    if snapshot.state == PowerState::Offline {
                        if let Err(e) = self.sink.offline_alert(instance).await {
                            warn!(instance = %instance.id, "offline alert failed: {e}");
                        }
                    }
                }
                Err(e) => {
                    warn!(instance = %instance.id, "watchdog check failed: {e}");
                }
            }
        }
    }
}
