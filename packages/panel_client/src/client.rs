use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::error::PanelError;
use crate::types::{PanelServer, PowerSignal, PowerState, ResourceSnapshot, StreamCredential};

/// Client for the control panel's REST API.
///
/// The client key authorizes per-instance operations; the optional
/// application key unlocks the panel-wide inventory listing.
pub struct PanelClient {
    http: reqwest::Client,
    base_url: String,
    client_key: String,
    application_key: Option<String>,
}

// Wire shapes for the panel's response envelopes. Kept private; callers only
// ever see the crate's own types.

#[derive(Deserialize)]
struct StatsEnvelope {
    attributes: StatsAttributes,
}

#[derive(Deserialize)]
struct StatsAttributes {
    current_state: PowerState,
    resources: StatsResources,
}

#[derive(Deserialize)]
struct StatsResources {
    #[serde(default)]
    cpu_absolute: f64,
    #[serde(default)]
    memory_bytes: u64,
    #[serde(default)]
    disk_bytes: u64,
    #[serde(default)]
    connections: u64,
}

#[derive(Deserialize)]
struct CredentialEnvelope {
    data: Vec<CredentialEntry>,
}

#[derive(Deserialize)]
struct CredentialEntry {
    attributes: CredentialAttributes,
}

#[derive(Deserialize)]
struct CredentialAttributes {
    token: String,
    socket: String,
}

#[derive(Deserialize)]
struct ServerListEnvelope {
    data: Vec<ServerEntry>,
}

#[derive(Deserialize)]
struct ServerEntry {
    attributes: ServerAttributes,
}

#[derive(Deserialize)]
struct ServerAttributes {
    uuid: String,
    identifier: String,
    name: String,
    limits: ServerLimits,
    #[serde(default)]
    suspended: bool,
}

#[derive(Deserialize)]
struct ServerLimits {
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    disk: u64,
}

impl PanelClient {
    pub fn new(
        base_url: &str,
        client_key: &str,
        application_key: Option<String>,
    ) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_key: client_key.to_string(),
            application_key,
        })
    }

    pub fn has_application_key(&self) -> bool {
        self.application_key.is_some()
    }

    fn client_url(&self, instance_id: &str, tail: &str) -> String {
        format!(
            "{}/api/client/servers/{}/{}",
            self.base_url, instance_id, tail
        )
    }

    async fn ensure_success(
        res: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, PanelError> {
        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else {
            Err(PanelError::Api {
                status: status.as_u16(),
                context: context.to_string(),
            })
        }
    }

    /// A 2xx response whose body fails to parse is a shape mismatch, not a
    /// transient fault; only a failure while reading the body stays retryable.
    fn decode_error(context: &str, err: reqwest::Error) -> PanelError {
        if err.is_decode() {
            PanelError::Decode {
                context: context.to_string(),
                reason: err.to_string(),
            }
        } else {
            PanelError::Transport(err)
        }
    }

    /// GET `/api/client/servers/{id}/resources`.
    pub async fn fetch_resources(&self, instance_id: &str) -> Result<ResourceSnapshot, PanelError> {
        let context = format!("resources for {instance_id}");
        let res = self
            .http
            .get(self.client_url(instance_id, "resources"))
            .bearer_auth(&self.client_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let body: StatsEnvelope = Self::ensure_success(res, &context)
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error(&context, e))?;

        Ok(ResourceSnapshot {
            state: body.attributes.current_state,
            cpu_percent: body.attributes.resources.cpu_absolute,
            memory_bytes: body.attributes.resources.memory_bytes,
            disk_bytes: body.attributes.resources.disk_bytes,
            connection_count: body.attributes.resources.connections,
            captured_at: Utc::now(),
        })
    }

    /// POST `/api/client/servers/{id}/power` with `{"signal": ...}`.
    pub async fn send_power(
        &self,
        instance_id: &str,
        signal: PowerSignal,
    ) -> Result<(), PanelError> {
        debug!(instance = instance_id, %signal, "sending power signal");
        let context = format!("power {signal} for {instance_id}");
        let res = self
            .http
            .post(self.client_url(instance_id, "power"))
            .bearer_auth(&self.client_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "signal": signal }))
            .send()
            .await?;
        Self::ensure_success(res, &context).await?;
        Ok(())
    }

    /// POST `/api/client/servers/{id}/command` with `{"command": ...}`.
    pub async fn send_command(&self, instance_id: &str, command: &str) -> Result<(), PanelError> {
        debug!(instance = instance_id, "sending console command");
        let context = format!("command for {instance_id}");
        let res = self
            .http
            .post(self.client_url(instance_id, "command"))
            .bearer_auth(&self.client_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await?;
        Self::ensure_success(res, &context).await?;
        Ok(())
    }

    /// GET `/api/client/servers/{id}/websocket` — issues a short-lived
    /// streaming endpoint + token.
    pub async fn fetch_stream_credential(
        &self,
        instance_id: &str,
    ) -> Result<StreamCredential, PanelError> {
        let context = format!("stream credential for {instance_id}");
        let res = self
            .http
            .get(self.client_url(instance_id, "websocket"))
            .bearer_auth(&self.client_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let body: CredentialEnvelope = Self::ensure_success(res, &context)
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error(&context, e))?;

        let entry = body.data.into_iter().next().ok_or(PanelError::Decode {
            context,
            reason: "empty credential list".to_string(),
        })?;
        Ok(StreamCredential {
            endpoint: entry.attributes.socket,
            token: entry.attributes.token,
        })
    }

    /// GET `/api/application/servers` — panel-wide inventory. Requires the
    /// application key.
    pub async fn list_servers(&self) -> Result<Vec<PanelServer>, PanelError> {
        let key = self
            .application_key
            .as_ref()
            .ok_or(PanelError::MissingApplicationKey)?;
        let res = self
            .http
            .get(format!("{}/api/application/servers", self.base_url))
            .bearer_auth(key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let body: ServerListEnvelope = Self::ensure_success(res, "server listing")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("server listing", e))?;

        Ok(body
            .data
            .into_iter()
            .map(|entry| PanelServer {
                uuid: entry.attributes.uuid,
                identifier: entry.attributes.identifier,
                name: entry.attributes.name,
                memory_limit_mb: entry.attributes.limits.memory,
                disk_limit_mb: entry.attributes.limits.disk,
                suspended: entry.attributes.suspended,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> PanelClient {
        PanelClient::new(&server.uri(), "client-key", Some("app-key".to_string())).unwrap()
    }

    #[tokio::test]
    async fn fetch_resources_maps_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/web-1/resources"))
            .and(header("authorization", "Bearer client-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "stats",
                "attributes": {
                    "current_state": "running",
                    "resources": {
                        "cpu_absolute": 73.2,
                        "memory_bytes": 536870912u64,
                        "disk_bytes": 1073741824u64,
                        "connections": 5
                    }
                }
            })))
            .mount(&server)
            .await;

        let snap = client_for(&server)
            .await
            .fetch_resources("web-1")
            .await
            .unwrap();
        assert_eq!(snap.state, PowerState::Running);
        assert_eq!(snap.cpu_percent, 73.2);
        assert_eq!(snap.memory_bytes, 536870912);
        assert_eq!(snap.disk_bytes, 1073741824);
        assert_eq!(snap.connection_count, 5);
    }

    #[tokio::test]
    async fn fetch_resources_non_success_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/web-1/resources"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_resources("web-1")
            .await
            .unwrap_err();
        match err {
            PanelError::Api { status, .. } => assert_eq!(status, 404),
            other => panic!("expected Api error, got {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_resources_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/web-1/resources"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "object": "stats" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_resources("web-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::Decode { .. }));
        // A shape mismatch will not heal on retry.
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn send_power_posts_signal_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client/servers/web-1/power"))
            .and(body_json(serde_json::json!({ "signal": "stop" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .send_power("web-1", PowerSignal::Stop)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_command_posts_literal_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client/servers/web-1/command"))
            .and(body_json(serde_json::json!({ "command": "say hello" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .send_command("web-1", "say hello")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fetch_stream_credential_unwraps_first_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/web-1/websocket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "attributes": { "token": "tok-1", "socket": "wss://node/stream" } }
                ]
            })))
            .mount(&server)
            .await;

        let cred = client_for(&server)
            .await
            .fetch_stream_credential("web-1")
            .await
            .unwrap();
        assert_eq!(cred.token, "tok-1");
        assert_eq!(cred.endpoint, "wss://node/stream");
    }

    #[tokio::test]
    async fn fetch_stream_credential_empty_list_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/web-1/websocket"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .fetch_stream_credential("web-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::Decode { .. }));
    }

    #[tokio::test]
    async fn list_servers_requires_application_key() {
        let server = MockServer::start().await;
        let client = PanelClient::new(&server.uri(), "client-key", None).unwrap();
        assert!(!client.has_application_key());
        let err = client.list_servers().await.unwrap_err();
        assert!(matches!(err, PanelError::MissingApplicationKey));
    }

    #[tokio::test]
    async fn list_servers_maps_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/application/servers"))
            .and(header("authorization", "Bearer app-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "attributes": {
                            "uuid": "u-1",
                            "identifier": "web-1",
                            "name": "Web One",
                            "limits": { "memory": 4096, "disk": 10240 },
                            "suspended": true
                        }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let servers = client_for(&server).await.list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].identifier, "web-1");
        assert_eq!(servers[0].memory_limit_mb, 4096);
        assert_eq!(servers[0].disk_limit_mb, 10240);
        assert!(servers[0].suspended);
    }
}
