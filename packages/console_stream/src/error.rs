use thiserror::Error;

/// Failures inside the streaming pipeline. None of these reach subscribers;
/// the connection task absorbs them into its retry loop and subscribers only
/// ever observe a gap in output.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("credential fetch failed: {0}")]
    Credential(String),
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
}
