//! HTTP binding to the control-panel REST API.
//!
//! This crate owns the panel-facing data model (resource snapshots, power
//! signals, stream credentials) and a thin `reqwest` client over the panel's
//! client and application endpoints. It has no knowledge of sessions,
//! streaming, or any caller-side policy; higher layers decide what is
//! retryable via [`PanelError`].

mod client;
mod error;
mod types;

pub use client::PanelClient;
pub use error::PanelError;
pub use types::{PanelServer, PowerSignal, PowerState, ResourceSnapshot, StreamCredential};
