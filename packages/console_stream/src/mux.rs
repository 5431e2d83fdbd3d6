use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::ConnectionTask;
use crate::transport::{CredentialIssuer, StreamTransport};

/// Callback invoked for every console line of a subscribed instance.
/// Returning an error marks this delivery as failed for this listener only;
/// the line still reaches everyone else.
pub type ConsoleListener =
    Arc<dyn Fn(&str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Lifecycle phase of one instance's stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    AcquiringCredential,
    Connecting,
    Authenticating,
    Streaming,
    Backoff,
}

/// Backoff delays for the reconnect loop: short after a clean remote close,
/// long after a credential/connect/authenticate failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub close_delay: Duration,
    pub failure_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            close_delay: Duration::from_secs(5),
            failure_delay: Duration::from_secs(15),
        }
    }
}

struct StreamEntry {
    listeners: Arc<Mutex<HashMap<u64, ConsoleListener>>>,
    state: Arc<Mutex<StreamState>>,
    task: JoinHandle<()>,
}

struct MuxInner {
    issuer: Arc<dyn CredentialIssuer>,
    transport: Arc<dyn StreamTransport>,
    retry: RetryPolicy,
    streams: Mutex<HashMap<String, StreamEntry>>,
    next_listener_id: AtomicU64,
}

/// Connection multiplexer: at most one live stream per instance id,
/// reference-counted by subscribers.
///
/// The registry lock is the atomicity boundary for subscribe/unsubscribe;
/// line dispatch never holds it, so listeners may unsubscribe from inside
/// their own callback.
#[derive(Clone)]
pub struct ConsoleMux {
    inner: Arc<MuxInner>,
}

impl ConsoleMux {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        transport: Arc<dyn StreamTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                issuer,
                transport,
                retry,
                streams: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener for one instance's console output. The first
    /// subscriber for an id spawns its connection state machine; later ones
    /// share it. Must be called from within the runtime.
    pub fn subscribe(&self, instance_id: &str, listener: ConsoleListener) -> Subscription {
        let listener_id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let mut streams = self.inner.streams.lock().unwrap();
        let entry = streams
            .entry(instance_id.to_string())
            .or_insert_with(|| self.spawn_entry(instance_id));
        entry
            .listeners
            .lock()
            .unwrap()
            .insert(listener_id, listener);
        debug!(instance = instance_id, listener = listener_id, "console subscriber added");

        Subscription {
            inner: Arc::clone(&self.inner),
            instance_id: instance_id.to_string(),
            listener_id,
            released: AtomicBool::new(false),
        }
    }

    fn spawn_entry(&self, instance_id: &str) -> StreamEntry {
        let listeners = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(Mutex::new(StreamState::Idle));
        let task = tokio::spawn(
            ConnectionTask {
                instance_id: instance_id.to_string(),
                issuer: Arc::clone(&self.inner.issuer),
                transport: Arc::clone(&self.inner.transport),
                retry: self.inner.retry,
                listeners: Arc::clone(&listeners),
                state: Arc::clone(&state),
            }
            .run(),
        );
        StreamEntry {
            listeners,
            state,
            task,
        }
    }

    /// Number of live stream connections across all instances.
    pub fn connection_count(&self) -> usize {
        self.inner.streams.lock().unwrap().len()
    }

    /// Number of listeners currently subscribed to one instance.
    pub fn listener_count(&self, instance_id: &str) -> usize {
        self.inner
            .streams
            .lock()
            .unwrap()
            .get(instance_id)
            .map(|e| e.listeners.lock().unwrap().len())
            .unwrap_or(0)
    }

    /// Current state of one instance's connection; `None` when no
    /// connection exists (equivalent to `Idle` with no machine).
    pub fn state(&self, instance_id: &str) -> Option<StreamState> {
        self.inner
            .streams
            .lock()
            .unwrap()
            .get(instance_id)
            .map(|e| *e.state.lock().unwrap())
    }
}

/// Handle for one registered listener. Unsubscribing (or dropping) removes
/// exactly this listener; the last one out tears the connection down,
/// aborting any in-flight credential fetch or handshake.
pub struct Subscription {
    inner: Arc<MuxInner>,
    instance_id: String,
    listener_id: u64,
    released: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut streams = self.inner.streams.lock().unwrap();
        let Some(entry) = streams.get(&self.instance_id) else {
            return;
        };
        let now_empty = {
            let mut listeners = entry.listeners.lock().unwrap();
            listeners.remove(&self.listener_id);
            listeners.is_empty()
        };
        debug!(
            instance = %self.instance_id,
            listener = self.listener_id,
            "console subscriber removed"
        );
        if now_empty {
            // Teardown wins over any in-flight connect attempt: abort the
            // state machine and drop the registry entry so the next
            // subscribe starts clean.
            if let Some(entry) = streams.remove(&self.instance_id) {
                entry.task.abort();
                debug!(instance = %self.instance_id, "last subscriber left, stream torn down");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
