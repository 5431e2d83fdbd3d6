use panel_client::PanelError;
use thiserror::Error;

/// Failures of the control-session surface. `Denied` is the caller's problem
/// and never a system fault; it is produced before any downstream call, so a
/// denied action has no side effects anywhere.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("not authorized for this action")]
    Denied,
    #[error("unknown instance: {0}")]
    UnknownInstance(String),
    #[error("no control session for that key")]
    UnknownSession,
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error(transparent)]
    Panel(#[from] PanelError),
}
