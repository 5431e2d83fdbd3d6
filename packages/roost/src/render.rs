use chrono::{DateTime, Utc};
use panel_client::{PowerState, ResourceSnapshot};
use serde::Serialize;
use std::time::Duration;

use crate::config::ManagedInstance;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const SPARK_WINDOW: usize = 20;

/// Full CPU scale for the sparkline; panels report per-core percentages,
/// so a busy multi-core instance sits well above 100.
pub const CPU_SPARK_MAX: f64 = 300.0;

/// Human-readable byte count, 1024-based, one decimal above bytes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.1}%")
}

/// Eight-level bar chart over the last 20 samples, scaled against `max`.
/// No samples renders as `∅` so an empty history is visibly empty.
pub fn sparkline(values: &[f64], max: f64) -> String {
    let start = values.len().saturating_sub(SPARK_WINDOW);
    let window = &values[start..];
    if window.is_empty() {
        return "∅".to_string();
    }
    window
        .iter()
        .map(|v| {
            let ratio = if max > 0.0 { (v / max).clamp(0.0, 1.0) } else { 0.0 };
            let idx = (ratio * (SPARK_LEVELS.len() - 1) as f64).round() as usize;
            SPARK_LEVELS[idx]
        })
        .collect()
}

/// Actions meaningful for an instance in the given power state. `refresh`
/// is always available; power actions follow the state machine.
pub fn valid_actions(state: PowerState) -> Vec<&'static str> {
    match state {
        PowerState::Running => vec!["stop", "restart", "command", "refresh"],
        PowerState::Offline => vec!["start", "refresh"],
        PowerState::Starting | PowerState::Stopping | PowerState::Unknown => vec!["refresh"],
    }
}

/// Rendered control-session view: everything a fronting surface needs to
/// draw one status card. Pure data, serialized as-is.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub instance_id: String,
    pub name: String,
    pub address: Option<String>,
    pub state: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub players: u64,
    pub cpu_spark: String,
    pub ram_spark: String,
    pub console_tail: Vec<String>,
    pub valid_actions: Vec<&'static str>,
    pub created_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
    pub ttl_remaining_secs: u64,
}

pub fn status_view(
    instance: &ManagedInstance,
    snapshot: Option<&ResourceSnapshot>,
    cpu_history: &[f64],
    ram_history: &[f64],
    console_tail: Vec<String>,
    created_at: DateTime<Utc>,
    ttl_remaining: Duration,
) -> StatusView {
    let state = snapshot.map(|s| s.state).unwrap_or(PowerState::Unknown);
    let ram_max = instance
        .memory_limit_mb
        .map(|mb| (mb * 1024 * 1024) as f64)
        .or_else(|| ram_history.iter().copied().fold(None, |m, v| Some(f64::max(m.unwrap_or(0.0), v))))
        .unwrap_or(1.0);

    StatusView {
        instance_id: instance.id.clone(),
        name: instance.name.clone(),
        address: instance.display_host.clone(),
        state: state.to_string(),
        cpu: snapshot
            .map(|s| format_percent(s.cpu_percent))
            .unwrap_or_else(|| "n/a".to_string()),
        memory: snapshot
            .map(|s| format_bytes(s.memory_bytes))
            .unwrap_or_else(|| "n/a".to_string()),
        disk: snapshot
            .map(|s| format_bytes(s.disk_bytes))
            .unwrap_or_else(|| "n/a".to_string()),
        players: snapshot.map(|s| s.connection_count).unwrap_or(0),
        cpu_spark: sparkline(cpu_history, CPU_SPARK_MAX),
        ram_spark: sparkline(ram_history, ram_max),
        console_tail,
        valid_actions: valid_actions(state),
        created_at,
        captured_at: snapshot.map(|s| s.captured_at),
        ttl_remaining_secs: ttl_remaining.as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale_through_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_bytes(1536), "1.5 KB");
    }

    #[test]
    fn percent_keeps_one_decimal() {
        assert_eq!(format_percent(42.0), "42.0%");
        assert_eq!(format_percent(0.25), "0.2%");
        assert_eq!(format_percent(142.857), "142.9%");
    }

    #[test]
    fn sparkline_spans_levels() {
        assert_eq!(sparkline(&[0.0, 50.0, 100.0], 100.0), "▁▅█");
    }

    #[test]
    fn sparkline_clamps_above_max() {
        assert_eq!(sparkline(&[250.0], 100.0), "█");
    }

    #[test]
    fn sparkline_empty_is_marked() {
        assert_eq!(sparkline(&[], 100.0), "∅");
    }

    #[test]
    fn sparkline_keeps_last_twenty() {
        let values: Vec<f64> = (0..30).map(|_| 0.0).collect();
        assert_eq!(sparkline(&values, 100.0).chars().count(), 20);
    }

    #[test]
    fn actions_follow_power_state() {
        assert_eq!(
            valid_actions(PowerState::Running),
            vec!["stop", "restart", "command", "refresh"]
        );
        assert_eq!(valid_actions(PowerState::Offline), vec!["start", "refresh"]);
        assert_eq!(valid_actions(PowerState::Starting), vec!["refresh"]);
        assert_eq!(valid_actions(PowerState::Unknown), vec!["refresh"]);
    }

    #[test]
    fn view_without_telemetry_reads_unknown() {
        let instance = ManagedInstance {
            id: "abc123".to_string(),
            name: "Web One".to_string(),
            owner_id: "alice".to_string(),
            display_host: Some("play.example.com".to_string()),
            memory_limit_mb: Some(1024),
            disk_limit_mb: None,
        };
        let view = status_view(
            &instance,
            None,
            &[],
            &[],
            Vec::new(),
            Utc::now(),
            Duration::from_secs(600),
        );
        assert_eq!(view.state, "unknown");
        assert_eq!(view.cpu, "n/a");
        assert_eq!(view.cpu_spark, "∅");
        assert_eq!(view.valid_actions, vec!["refresh"]);
        assert_eq!(view.ttl_remaining_secs, 600);
    }
}
