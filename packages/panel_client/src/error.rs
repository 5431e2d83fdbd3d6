use thiserror::Error;

/// Errors from the control-panel binding.
///
/// `Transport` covers connection-level failures and is the only retryable
/// variant; `Api` is a non-success status from the panel itself and is
/// surfaced to the caller as-is.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Request never produced a usable HTTP response.
    #[error("panel request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The panel answered with a non-success status.
    #[error("panel returned {status} for {context}")]
    Api { status: u16, context: String },
    /// The response arrived but did not have the expected shape.
    #[error("unexpected panel response for {context}: {reason}")]
    Decode { context: String, reason: String },
    /// Application-level endpoints need a key that was never configured.
    #[error("application API key is not configured")]
    MissingApplicationKey,
}

impl PanelError {
    /// Whether a caller with its own retry policy should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PanelError::Transport(_))
    }
}
