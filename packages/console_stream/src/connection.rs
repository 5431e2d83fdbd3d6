use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::mux::{ConsoleListener, RetryPolicy, StreamState};
use crate::protocol::{InboundEvent, WireFrame};
use crate::transport::{CredentialIssuer, StreamTransport};

/// Why one pass through the state machine ended.
enum StreamOutcome {
    /// Credential-expiry notice: reconnect immediately, no backoff.
    Renew,
    /// Remote hung up (or errored mid-stream): short backoff.
    Closed,
    /// Credential fetch / connect / authenticate failed: long backoff.
    Failed(StreamError),
}

/// The per-instance connection state machine. Runs as one spawned task owned
/// by the multiplexer's registry entry; teardown aborts the task, which
/// abandons any in-flight credential fetch or handshake.
pub(crate) struct ConnectionTask {
    pub(crate) instance_id: String,
    pub(crate) issuer: Arc<dyn CredentialIssuer>,
    pub(crate) transport: Arc<dyn StreamTransport>,
    pub(crate) retry: RetryPolicy,
    pub(crate) listeners: Arc<Mutex<HashMap<u64, ConsoleListener>>>,
    pub(crate) state: Arc<Mutex<StreamState>>,
}

impl ConnectionTask {
    pub(crate) async fn run(self) {
        // Retries are deliberately uncapped: the task's lifetime is bounded
        // by the subscriber set, and the attempt counter below gives an
        // external supervisor something to alert on.
        let mut failed_attempts: u64 = 0;
        loop {
            match self.connect_and_stream().await {
                StreamOutcome::Renew => {
                    debug!(instance = %self.instance_id, "stream credential expiring, reconnecting");
                    failed_attempts = 0;
                }
                StreamOutcome::Closed => {
                    debug!(instance = %self.instance_id, "console stream closed, retrying");
                    failed_attempts = 0;
                    self.backoff(self.retry.close_delay).await;
                }
                StreamOutcome::Failed(err) => {
                    failed_attempts += 1;
                    warn!(
                        instance = %self.instance_id,
                        attempt = failed_attempts,
                        "console stream attempt failed: {err}"
                    );
                    self.backoff(self.retry.failure_delay).await;
                }
            }
        }
    }

    fn set_state(&self, state: StreamState) {
        *self.state.lock().unwrap() = state;
    }

    async fn backoff(&self, delay: Duration) {
        self.set_state(StreamState::Backoff);
        tokio::time::sleep(delay).await;
    }

    async fn connect_and_stream(&self) -> StreamOutcome {
        self.set_state(StreamState::AcquiringCredential);
        let credential = match self.issuer.issue(&self.instance_id).await {
            Ok(c) => c,
            Err(e) => return StreamOutcome::Failed(e),
        };

        self.set_state(StreamState::Connecting);
        let mut conn = match self.transport.connect(&credential).await {
            Ok(c) => c,
            Err(e) => return StreamOutcome::Failed(e),
        };

        self.set_state(StreamState::Authenticating);
        if let Err(e) = conn.send(WireFrame::auth(&credential.token)).await {
            return StreamOutcome::Failed(e);
        }

        let mut authenticated = false;
        loop {
            match conn.next_event().await {
                None => return StreamOutcome::Closed,
                Some(Err(e)) if authenticated => {
                    debug!(instance = %self.instance_id, "stream error: {e}");
                    return StreamOutcome::Closed;
                }
                Some(Err(e)) => return StreamOutcome::Failed(e),
                Some(Ok(InboundEvent::AuthAck)) => {
                    authenticated = true;
                    self.set_state(StreamState::Streaming);
                }
                Some(Ok(InboundEvent::TokenExpiring)) => return StreamOutcome::Renew,
                Some(Ok(InboundEvent::ConsoleOutput(line))) => self.dispatch(&line),
                Some(Ok(InboundEvent::Other)) => {}
            }
        }
    }

    /// Deliver one line to every current listener, in registration order of
    /// the snapshot. The lock is released before any callback runs, so a
    /// listener may unsubscribe (even itself) from inside its callback; a
    /// failing listener never blocks delivery to the rest.
    fn dispatch(&self, line: &str) {
        let snapshot: Vec<(u64, ConsoleListener)> = {
            let listeners = self.listeners.lock().unwrap();
            let mut entries: Vec<_> = listeners
                .iter()
                .map(|(id, l)| (*id, Arc::clone(l)))
                .collect();
            entries.sort_by_key(|(id, _)| *id);
            entries
        };
        for (id, listener) in snapshot {
            if let Err(e) = listener(line) {
                warn!(
                    instance = %self.instance_id,
                    listener = id,
                    "console listener failed: {e}"
                );
            }
        }
    }
}
