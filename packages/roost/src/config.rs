use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [panel]
//                    base_url = "https://panel.example.com"
//
//   env var:         ROOST_PANEL__BASE_URL=...   (double underscore = nesting)
//
//   (single underscore stays within field names: ROOST_SESSION__TTL_SECS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub panel: PanelFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub watchdog: WatchdogFileConfig,
    #[serde(default)]
    pub admin: AdminFileConfig,
    #[serde(default)]
    pub instances: Vec<InstanceFileConfig>,
}

/// Panel API endpoints and keys (lives under `[panel]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PanelFileConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub client_key: String,
    /// Application (admin) API key; the panel-wide inventory listing is
    /// unavailable without it.
    #[serde(default)]
    pub application_key: Option<String>,
}

/// HTTP surface bind settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Control session tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_tail_cap")]
    pub console_tail_cap: usize,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            ttl_secs: default_session_ttl(),
            history_cap: default_history_cap(),
            console_tail_cap: default_tail_cap(),
        }
    }
}

/// Fleet watchdog tunables (lives under `[watchdog]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchdogFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Webhook URL for offline alerts. Without it, alerts go to the log.
    #[serde(default)]
    pub alert_webhook: Option<String>,
}

impl Default for WatchdogFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval(),
            alert_webhook: None,
        }
    }
}

/// Platform-admin allow lists (lives under `[admin]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminFileConfig {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// One managed instance (repeated `[[instances]]` tables in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceFileConfig {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub display_host: Option<String>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub disk_limit_mb: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8780
}
fn default_poll_interval() -> u64 {
    15
}
fn default_session_ttl() -> u64 {
    600
}
fn default_history_cap() -> usize {
    300
}
fn default_tail_cap() -> usize {
    200
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

/// Build a figment that layers: defaults → config.toml → ROOST_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `ROOST_PANEL__BASE_URL=...`  →  `panel.base_url = ...`
///   `ROOST_SESSION__TTL_SECS=300`  →  `session.ttl_secs = 300`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("ROOST_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// One instance under management, as the operator declared it. Immutable for
/// the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManagedInstance {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    /// Address players connect to, shown in status views.
    pub display_host: Option<String>,
    pub memory_limit_mb: Option<u64>,
    pub disk_limit_mb: Option<u64>,
}

impl ManagedInstance {
    pub fn from_file(fc: &InstanceFileConfig) -> Self {
        Self {
            id: fc.id.clone(),
            name: fc.name.clone(),
            owner_id: fc.owner_id.clone(),
            display_host: fc.display_host.clone(),
            memory_limit_mb: fc.memory_limit_mb,
            disk_limit_mb: fc.disk_limit_mb,
        }
    }
}

/// Control session timing and bounds (runtime view).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub ttl: Duration,
    /// Cap on each of the cpu/ram sample histories.
    pub history_cap: usize,
    /// Cap on the retained console tail.
    pub console_tail_cap: usize,
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(fc.poll_interval_secs),
            ttl: Duration::from_secs(fc.ttl_secs),
            history_cap: fc.history_cap,
            console_tail_cap: fc.console_tail_cap,
        }
    }
}

/// Watchdog sweep timing (runtime view).
#[derive(Clone, Debug)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub sweep_interval: Duration,
    pub alert_webhook: Option<String>,
}

impl WatchdogConfig {
    pub fn from_file(fc: &WatchdogFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
            sweep_interval: Duration::from_secs(fc.sweep_interval_secs),
            alert_webhook: fc.alert_webhook.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_session_file_config_defaults() {
        let d = SessionFileConfig::default();
        assert_eq!(d.poll_interval_secs, 15);
        assert_eq!(d.ttl_secs, 600);
        assert_eq!(d.history_cap, 300);
        assert_eq!(d.console_tail_cap, 200);
    }

    #[test]
    fn test_watchdog_file_config_defaults() {
        let d = WatchdogFileConfig::default();
        assert!(d.enabled);
        assert_eq!(d.sweep_interval_secs, 60);
        assert!(d.alert_webhook.is_none());
    }

    #[test]
    fn test_server_file_config_defaults() {
        let d = ServerFileConfig::default();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, 8780);
    }

    // ── from_file conversions ───────────────────────────────────────────

    #[test]
    fn test_session_config_from_file() {
        let fc = SessionFileConfig {
            poll_interval_secs: 5,
            ttl_secs: 120,
            history_cap: 10,
            console_tail_cap: 4,
        };
        let sc = SessionConfig::from_file(&fc);
        assert_eq!(sc.poll_interval, Duration::from_secs(5));
        assert_eq!(sc.ttl, Duration::from_secs(120));
        assert_eq!(sc.history_cap, 10);
        assert_eq!(sc.console_tail_cap, 4);
    }

    #[test]
    fn test_managed_instance_from_file() {
        let fc = InstanceFileConfig {
            id: "abc123".to_string(),
            name: "Web One".to_string(),
            owner_id: "alice".to_string(),
            display_host: Some("play.example.com".to_string()),
            memory_limit_mb: Some(4096),
            disk_limit_mb: None,
        };
        let mi = ManagedInstance::from_file(&fc);
        assert_eq!(mi.id, "abc123");
        assert_eq!(mi.owner_id, "alice");
        assert_eq!(mi.display_host.as_deref(), Some("play.example.com"));
        assert_eq!(mi.memory_limit_mb, Some(4096));
        assert!(mi.disk_limit_mb.is_none());
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join("config.toml"))
            .extract()
            .unwrap();
        assert!(fc.panel.base_url.is_empty());
        assert!(fc.instances.is_empty());
        assert_eq!(fc.session.ttl_secs, 600);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[panel]
base_url = "https://panel.example.com"
client_key = "ptlc_xyz"

[session]
ttl_secs = 300

[admin]
users = ["ops-1"]
roles = ["Moderator"]

[[instances]]
id = "abc123"
name = "Web One"
owner_id = "alice"
memory_limit_mb = 2048
"#,
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.panel.base_url, "https://panel.example.com");
        assert!(fc.panel.application_key.is_none());
        assert_eq!(fc.session.ttl_secs, 300);
        assert_eq!(fc.session.poll_interval_secs, 15);
        assert_eq!(fc.admin.users, vec!["ops-1"]);
        assert_eq!(fc.instances.len(), 1);
        assert_eq!(fc.instances[0].owner_id, "alice");
    }
}
