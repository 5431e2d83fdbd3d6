use async_trait::async_trait;
use panel_client::{PanelClient, PanelError, PanelServer, PowerSignal, ResourceSnapshot};

/// The slice of the panel API the service consumes. A trait seam so sessions,
/// the watchdog, and the HTTP surface are testable without a live panel.
#[async_trait]
pub trait PanelApi: Send + Sync {
    async fn resources(&self, instance_id: &str) -> Result<ResourceSnapshot, PanelError>;
    async fn power(&self, instance_id: &str, signal: PowerSignal) -> Result<(), PanelError>;
    async fn command(&self, instance_id: &str, text: &str) -> Result<(), PanelError>;
    async fn list_servers(&self) -> Result<Vec<PanelServer>, PanelError>;
    fn has_application_key(&self) -> bool;
}

#[async_trait]
impl PanelApi for PanelClient {
    async fn resources(&self, instance_id: &str) -> Result<ResourceSnapshot, PanelError> {
        self.fetch_resources(instance_id).await
    }

    async fn power(&self, instance_id: &str, signal: PowerSignal) -> Result<(), PanelError> {
        self.send_power(instance_id, signal).await
    }

    async fn command(&self, instance_id: &str, text: &str) -> Result<(), PanelError> {
        self.send_command(instance_id, text).await
    }

    async fn list_servers(&self) -> Result<Vec<PanelServer>, PanelError> {
        PanelClient::list_servers(self).await
    }

    fn has_application_key(&self) -> bool {
        PanelClient::has_application_key(self)
    }
}
