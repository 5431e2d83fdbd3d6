use serde::{Deserialize, Serialize};

pub const EVENT_AUTH: &str = "auth";
pub const EVENT_AUTH_ACK: &str = "auth success";
pub const EVENT_TOKEN_EXPIRING: &str = "token expiring";
pub const EVENT_CONSOLE_OUTPUT: &str = "console output";

/// Raw frame shape of the panel's streaming protocol:
/// `{"event": "...", "args": ["..."]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl WireFrame {
    /// Authentication frame sent immediately after connect.
    pub fn auth(token: &str) -> Self {
        Self {
            event: EVENT_AUTH.to_string(),
            args: vec![token.to_string()],
        }
    }
}

/// Inbound messages the state machine cares about. The protocol is owned by
/// the panel and may grow new event types; those surface as `Other` and are
/// ignored rather than treated as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    AuthAck,
    TokenExpiring,
    ConsoleOutput(String),
    Other,
}

impl InboundEvent {
    /// Parse one text frame. Returns `None` for malformed frames, which are
    /// dropped silently.
    pub fn parse(text: &str) -> Option<InboundEvent> {
        let frame: WireFrame = serde_json::from_str(text).ok()?;
        Some(match frame.event.as_str() {
            EVENT_AUTH_ACK => InboundEvent::AuthAck,
            EVENT_TOKEN_EXPIRING => InboundEvent::TokenExpiring,
            EVENT_CONSOLE_OUTPUT => match frame.args.into_iter().next() {
                Some(line) => InboundEvent::ConsoleOutput(line),
                None => InboundEvent::Other,
            },
            _ => InboundEvent::Other,
        })
    }
}
