use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use console_stream::{ConsoleMux, Subscription};
use panel_client::{PowerSignal, ResourceSnapshot};

use crate::authz::{self, Actor};
use crate::config::{AdminFileConfig, ManagedInstance, SessionConfig};
use crate::error::ControlError;
use crate::panel::PanelApi;
use crate::render::{self, StatusView};

/// A control session belongs to one actor looking at one instance from one
/// surface. The same actor on two surfaces gets two sessions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub instance_id: String,
    pub actor_id: String,
    pub surface_id: String,
}

/// Mutating actions a session can dispatch. `Refresh` performs an
/// out-of-cycle telemetry fetch instead of a downstream control call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Refresh,
    SendCommand(String),
}

#[derive(Default)]
struct Telemetry {
    latest: Option<ResourceSnapshot>,
    cpu: VecDeque<f64>,
    ram: VecDeque<f64>,
}

struct Session {
    instance: ManagedInstance,
    created_at: DateTime<Utc>,
    /// TTL deadline. Moves only on explicit renewal; polling never touches it.
    deadline: Mutex<Instant>,
    telemetry: Mutex<Telemetry>,
    tail: Arc<Mutex<VecDeque<String>>>,
    subscription: Subscription,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Idempotent: the first call releases the console subscription and
    /// cancels the poll and TTL tasks; later calls are no-ops. Safe to call
    /// from the TTL task itself (self-abort lands after this returns).
    fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscription.unsubscribe();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    fn renew(&self, ttl: Duration) {
        *self.deadline.lock().unwrap() = Instant::now() + ttl;
    }

    fn record_snapshot(&self, snapshot: ResourceSnapshot, cap: usize) {
        let mut t = self.telemetry.lock().unwrap();
        t.cpu.push_back(snapshot.cpu_percent);
        while t.cpu.len() > cap {
            t.cpu.pop_front();
        }
        t.ram.push_back(snapshot.memory_bytes as f64);
        while t.ram.len() > cap {
            t.ram.pop_front();
        }
        t.latest = Some(snapshot);
    }
}

struct ManagerInner {
    panel: Arc<dyn PanelApi>,
    mux: ConsoleMux,
    cfg: SessionConfig,
    admin: AdminFileConfig,
    instances: HashMap<String, ManagedInstance>,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
}

/// Registry of live control sessions: fetch-or-create per key, 15 s telemetry
/// polling, bounded histories, TTL-bounded lifetime, authorization recomputed
/// on every dispatched action.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        panel: Arc<dyn PanelApi>,
        mux: ConsoleMux,
        cfg: SessionConfig,
        admin: AdminFileConfig,
        instances: Vec<ManagedInstance>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                panel,
                mux,
                cfg,
                admin,
                instances: instances.into_iter().map(|i| (i.id.clone(), i)).collect(),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn instance(&self, instance_id: &str) -> Option<ManagedInstance> {
        self.inner.instances.get(instance_id).cloned()
    }

    pub fn instances(&self) -> Vec<ManagedInstance> {
        let mut list: Vec<_> = self.inner.instances.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    /// Open (or return the existing) session for this key and render its
    /// current view. Opening is read-only and allowed for any actor; only
    /// dispatched actions are authorization-gated.
    pub async fn open(
        &self,
        instance_id: &str,
        actor: &Actor,
        surface_id: &str,
    ) -> Result<StatusView, ControlError> {
        let instance = self
            .instance(instance_id)
            .ok_or_else(|| ControlError::UnknownInstance(instance_id.to_string()))?;
        let key = SessionKey {
            instance_id: instance_id.to_string(),
            actor_id: actor.id.clone(),
            surface_id: surface_id.to_string(),
        };
        let (session, created) = ManagerInner::ensure_session(&self.inner, &key, instance);
        if created {
            info!(
                instance = %key.instance_id,
                actor = %key.actor_id,
                surface = %key.surface_id,
                "control session opened"
            );
            // First reading before the first render; a failure here leaves
            // the view empty until the poll loop catches up.
            match self.inner.panel.resources(&key.instance_id).await {
                Ok(snapshot) => session.record_snapshot(snapshot, self.inner.cfg.history_cap),
                Err(e) => {
                    warn!(instance = %key.instance_id, "initial telemetry fetch failed: {e}")
                }
            }
        }
        self.render(&key)
    }

    /// Authorize and perform one action. Authorization is recomputed from
    /// the actor and current allow lists on every call; a denial happens
    /// before any downstream call and changes nothing. Success renews the
    /// session's TTL.
    pub async fn dispatch(
        &self,
        key: &SessionKey,
        actor: &Actor,
        action: ControlAction,
    ) -> Result<StatusView, ControlError> {
        let session = self.inner.get(key).ok_or(ControlError::UnknownSession)?;
        if !authz::may_control(actor, &session.instance, &self.inner.admin) {
            info!(
                actor = %actor.id,
                instance = %key.instance_id,
                "control action denied"
            );
            return Err(ControlError::Denied);
        }

        match &action {
            ControlAction::Start => {
                self.inner
                    .panel
                    .power(&key.instance_id, PowerSignal::Start)
                    .await?
            }
            ControlAction::Stop => {
                self.inner
                    .panel
                    .power(&key.instance_id, PowerSignal::Stop)
                    .await?
            }
            ControlAction::Restart => {
                self.inner
                    .panel
                    .power(&key.instance_id, PowerSignal::Restart)
                    .await?
            }
            ControlAction::SendCommand(text) => {
                self.inner.panel.command(&key.instance_id, text).await?
            }
            ControlAction::Refresh => {
                let snapshot = self.inner.panel.resources(&key.instance_id).await?;
                session.record_snapshot(snapshot, self.inner.cfg.history_cap);
            }
        }

        session.renew(self.inner.cfg.ttl);
        debug!(
            instance = %key.instance_id,
            actor = %actor.id,
            action = ?action,
            "control action dispatched"
        );
        self.render(key)
    }

    /// Pure view of the session's current state.
    pub fn render(&self, key: &SessionKey) -> Result<StatusView, ControlError> {
        let session = self.inner.get(key).ok_or(ControlError::UnknownSession)?;
        let (latest, cpu, ram) = {
            let t = session.telemetry.lock().unwrap();
            (
                t.latest.clone(),
                t.cpu.iter().copied().collect::<Vec<_>>(),
                t.ram.iter().copied().collect::<Vec<_>>(),
            )
        };
        let tail: Vec<String> = session.tail.lock().unwrap().iter().cloned().collect();
        let remaining = session
            .deadline
            .lock()
            .unwrap()
            .saturating_duration_since(Instant::now());
        Ok(render::status_view(
            &session.instance,
            latest.as_ref(),
            &cpu,
            &ram,
            tail,
            session.created_at,
            remaining,
        ))
    }

    /// Explicit termination. Returns whether a session was actually removed;
    /// closing an already-gone session is a successful no-op.
    pub fn close(&self, key: &SessionKey) -> bool {
        let removed = self.inner.sessions.lock().unwrap().remove(key);
        match removed {
            Some(session) => {
                session.terminate();
                info!(
                    instance = %key.instance_id,
                    actor = %key.actor_id,
                    "control session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Terminate every live session (graceful-shutdown path).
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.sessions.lock().unwrap().drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            session.terminate();
        }
        if count > 0 {
            info!(sessions = count, "terminated all control sessions");
        }
    }
}

impl ManagerInner {
    fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap()
            .get(key)
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .cloned()
    }

    /// Fetch-or-create under the registry lock. Returns whether this call
    /// created the session.
    fn ensure_session(
        inner: &Arc<ManagerInner>,
        key: &SessionKey,
        instance: ManagedInstance,
    ) -> (Arc<Session>, bool) {
        let mut sessions = inner.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(key) {
            if !existing.closed.load(Ordering::SeqCst) {
                return (Arc::clone(existing), false);
            }
        }

        let tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let tail_cap = inner.cfg.console_tail_cap;
        let sink = Arc::clone(&tail);
        let subscription = inner.mux.subscribe(
            &key.instance_id,
            Arc::new(move |line: &str| {
                let mut tail = sink.lock().unwrap();
                tail.push_back(line.to_string());
                while tail.len() > tail_cap {
                    tail.pop_front();
                }
                Ok(())
            }),
        );

        let session = Arc::new(Session {
            instance,
            created_at: Utc::now(),
            deadline: Mutex::new(Instant::now() + inner.cfg.ttl),
            telemetry: Mutex::new(Telemetry::default()),
            tail,
            subscription,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let poll = tokio::spawn(Self::poll_loop(
            Arc::clone(&inner.panel),
            Arc::clone(&session),
            key.instance_id.clone(),
            inner.cfg.poll_interval,
            inner.cfg.history_cap,
        ));
        let ttl = tokio::spawn(Self::ttl_loop(Arc::clone(inner), key.clone(), Arc::clone(&session)));
        session.tasks.lock().unwrap().extend([poll, ttl]);

        sessions.insert(key.clone(), Arc::clone(&session));
        (session, true)
    }

    async fn poll_loop(
        panel: Arc<dyn PanelApi>,
        session: Arc<Session>,
        instance_id: String,
        interval: Duration,
        history_cap: usize,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The opener does the first fetch; skip the immediate tick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match panel.resources(&instance_id).await {
                Ok(snapshot) => session.record_snapshot(snapshot, history_cap),
                // Contained: one bad poll is a gap, not a dead session.
                Err(e) => warn!(instance = %instance_id, "telemetry poll failed: {e}"),
            }
        }
    }

    async fn ttl_loop(inner: Arc<ManagerInner>, key: SessionKey, session: Arc<Session>) {
        loop {
            let deadline = *session.deadline.lock().unwrap();
            tokio::time::sleep_until(deadline).await;
            // Renewals move the deadline while we slept; re-check.
            if *session.deadline.lock().unwrap() <= Instant::now() {
                info!(
                    instance = %key.instance_id,
                    actor = %key.actor_id,
                    "control session expired"
                );
                inner.sessions.lock().unwrap().remove(&key);
                session.terminate();
                return;
            }
        }
    }
}
