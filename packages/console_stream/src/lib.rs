//! Console Stream Multiplexer.
//!
//! Maintains at most one live console stream per managed instance and fans
//! received output lines out to every current subscriber. Subscribers come
//! and go freely; the connection state machine (credential fetch → connect →
//! authenticate → stream, with backoff on failure and seamless credential
//! renewal) is shared and torn down the moment the last subscriber leaves.
//!
//! The panel's credential issuance and the websocket transport sit behind
//! traits so the whole lifecycle is testable without a network.

mod connection;
mod error;
mod mux;
mod protocol;
mod transport;

pub use error::StreamError;
pub use mux::{ConsoleListener, ConsoleMux, RetryPolicy, StreamState, Subscription};
pub use protocol::{InboundEvent, WireFrame};
pub use transport::{CredentialIssuer, StreamConn, StreamTransport, WebSocketTransport};
