// ── Hub facade ──
//
// Full lifecycle management for one portal connection: authentication,
// initial topology assembly, background polling, command routing, and
// the application-facing accessors. Cheaply cloneable via `Arc`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use domus_api::models::PortalEvent;
use domus_api::{PortalClient, TransportConfig};

use crate::config::HubConfig;
use crate::error::CoreError;
use crate::executions::{
    Action, ExecutionOutcome, ExecutionTracker, ExecutionUpdate, PendingExecution,
};
use crate::model::{self, Device, DeviceUrl, StateValue};
use crate::poller;
use crate::registry::{DeviceRegistry, StatesChanged};
use crate::session::{ConnectionState, SessionManager};
use crate::topology;

/// The main entry point for consumers.
///
/// `connect()` authenticates, assembles the device topology, and spawns
/// the background loops; the accessors below read and mutate the shared
/// state those loops keep synchronized.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    session: Arc<SessionManager>,
    registry: Arc<DeviceRegistry>,
    executions: Arc<ExecutionTracker>,
    /// Event feed registration; `None` means "needs (re)registration".
    listener: std::sync::Mutex<Option<String>>,
    /// Single-flight guard for the fetch cycle: a tick that finds its
    /// predecessor still running is a no-op, not queued.
    fetch_guard: AtomicBool,
    /// Same, for the refresh-completion wait.
    refresh_guard: AtomicBool,
    /// A full refresh was requested and its completion event is still
    /// outstanding.
    refresh_pending: AtomicBool,
    cancel: CancellationToken,
    /// Child token for the current connection -- cancelled on disconnect,
    /// replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Create a hub from configuration. Does NOT connect -- call
    /// [`connect()`](Self::connect) to authenticate and start the
    /// background loops.
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.timeout,
            cookie_jar: None,
        };
        let api = Arc::new(PortalClient::new(config.portal.clone(), &transport)?);
        let session = SessionManager::new(api, config.login.clone(), config.lockdown_base);
        let executions = ExecutionTracker::new(
            Arc::clone(&session),
            config.execution_capacity,
            config.execution_retry,
            config.execution_timeout,
        );
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                session,
                registry: Arc::new(DeviceRegistry::new()),
                executions,
                listener: std::sync::Mutex::new(None),
                fetch_guard: AtomicBool::new(false),
                refresh_guard: AtomicBool::new(false),
                refresh_pending: AtomicBool::new(false),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect to the portal.
    ///
    /// Authenticates, fetches and assembles the device topology, primes
    /// the event listener, and spawns the poll and refresh loops.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.session.set_state(ConnectionState::Connecting);

        // Fresh child token for this connection (supports reconnect).
        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();
        self.inner.executions.reset(child.clone());
        self.inner.fetch_guard.store(false, Ordering::Release);
        self.inner.refresh_guard.store(false, Ordering::Release);
        self.inner.refresh_pending.store(false, Ordering::Release);

        if let Err(e) = self.inner.session.ensure_authenticated().await {
            // A lockdown rejection short-circuits before the session
            // manager touches the lifecycle watch.
            self.inner.session.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        if let Err(e) = self.resync_devices().await {
            child.cancel();
            self.inner.session.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        // Prime the event listener so events queue from the start; the
        // poll loop recovers if this fails.
        match self
            .inner
            .session
            .run(|api| async move { api.register_event_listener().await })
            .await
        {
            Ok(id) => {
                *self.inner.listener.lock().expect("listener lock poisoned") = Some(id);
            }
            Err(e) => {
                warn!(error = %e, "event listener registration failed, poll loop will retry");
            }
        }

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(poller::event_poll_task(
            self.clone(),
            child.clone(),
        )));
        handles.push(tokio::spawn(poller::refresh_task(self.clone(), child)));

        info!(devices = self.inner.registry.len(), "connected to portal");
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Cancels the background loops cooperatively (an in-flight portal
    /// call settles on its own and its result is discarded), then makes a
    /// best-effort attempt to release the listener and the session.
    pub async fn disconnect(&self) {
        debug!("disconnecting");
        self.inner.cancel_child.lock().await.cancel();
        self.inner.task_handles.lock().await.clear();

        let listener = self
            .inner
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take();
        let api = self.inner.session.api();
        if let Some(id) = listener {
            if let Err(e) = api.unregister_event_listener(&id).await {
                debug!(error = %e, "listener unregister failed (ignored)");
            }
        }
        if let Err(e) = api.logout().await {
            debug!(error = %e, "logout failed (ignored)");
        }

        self.inner.session.invalidate().await;
        self.inner.session.set_state(ConnectionState::Disconnected);
        info!("disconnected from portal");
    }

    /// Observe connect/disconnect transitions.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.session.connection_state()
    }

    // ── Command execution ────────────────────────────────────────────

    /// Submit a command batch. Returns the portal's execution id; the
    /// outcome arrives on [`subscribe_executions`](Self::subscribe_executions).
    pub async fn execute(
        &self,
        actions: Vec<Action>,
        label: impl Into<String>,
    ) -> Result<String, CoreError> {
        self.execute_inner(actions, label.into(), false).await
    }

    /// Submit a batch that preempts the gateway-side queue.
    pub async fn execute_with_priority(
        &self,
        actions: Vec<Action>,
        label: impl Into<String>,
    ) -> Result<String, CoreError> {
        self.execute_inner(actions, label.into(), true).await
    }

    /// Submit a batch and wait for its terminal outcome.
    pub async fn execute_and_wait(
        &self,
        actions: Vec<Action>,
        label: impl Into<String>,
    ) -> Result<String, CoreError> {
        let mut updates = self.inner.executions.subscribe();
        let exec_id = self.execute_inner(actions, label.into(), false).await?;
        loop {
            let update = match updates.recv().await {
                Ok(update) => update,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(CoreError::NotConnected),
            };
            if let ExecutionUpdate::Finished {
                exec_id: id,
                outcome,
                failure,
            } = &*update
            {
                if *id != exec_id {
                    continue;
                }
                return match outcome {
                    ExecutionOutcome::Completed => Ok(exec_id),
                    ExecutionOutcome::Failed => Err(CoreError::Execution {
                        exec_id,
                        state: domus_api::models::ExecutionState::Failed,
                        message: failure
                            .clone()
                            .unwrap_or_else(|| "execution failed".to_owned()),
                    }),
                    ExecutionOutcome::TimedOut => Err(CoreError::ExecutionTimedOut { exec_id }),
                };
            }
        }
    }

    async fn execute_inner(
        &self,
        actions: Vec<Action>,
        label: String,
        high_priority: bool,
    ) -> Result<String, CoreError> {
        for action in &actions {
            let Some(device) = self.inner.registry.get(&action.device_url) else {
                return Err(CoreError::DeviceNotFound {
                    device_url: action.device_url.to_string(),
                });
            };
            for command in &action.commands {
                if !device.supports_command(&command.name) {
                    warn!(
                        device_url = %action.device_url,
                        command = %command.name,
                        "device does not declare this command, sending anyway"
                    );
                }
            }
        }
        self.inner
            .executions
            .submit(&actions, label, high_priority)
            .await
    }

    /// Best-effort remote cancel. The entry stays tracked until the
    /// portal settles it (or the watchdog does).
    pub async fn cancel_execution(&self, exec_id: &str) -> Result<(), CoreError> {
        self.inner.executions.request_cancel(exec_id).await
    }

    /// Snapshot of the executions currently tracked.
    pub fn pending_executions(&self) -> Vec<PendingExecution> {
        self.inner.executions.pending()
    }

    /// Subscribe to execution progress and outcomes.
    pub fn subscribe_executions(&self) -> broadcast::Receiver<Arc<ExecutionUpdate>> {
        self.inner.executions.subscribe()
    }

    // ── Topology and state accessors ─────────────────────────────────

    /// The underlying device registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    /// Top-level physical devices, in first-seen order.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.registry.top_level()
    }

    /// Every known device, sensors included.
    pub fn all_devices(&self) -> Vec<Device> {
        self.inner.registry.all()
    }

    pub fn device(&self, url: &DeviceUrl) -> Option<Device> {
        self.inner.registry.get(url)
    }

    /// Current states of one device, as last synchronized.
    pub fn states(&self, url: &DeviceUrl) -> Option<IndexMap<String, StateValue>> {
        self.inner.registry.get(url).map(|d| d.states)
    }

    /// Subscribe to coalesced state-change batches of one device.
    pub fn subscribe_states(
        &self,
        url: &DeviceUrl,
    ) -> Option<broadcast::Receiver<Arc<StatesChanged>>> {
        self.inner.registry.subscribe_states(url)
    }

    /// Subscribe to topology growth.
    pub fn subscribe_topology(&self) -> watch::Receiver<u64> {
        self.inner.registry.subscribe_topology()
    }

    // ── Refresh operations ───────────────────────────────────────────

    /// Ask the gateway to republish the states of all devices. The
    /// updated values arrive through the event feed.
    pub async fn refresh_all_states(&self) -> Result<(), CoreError> {
        self.inner.refresh_pending.store(true, Ordering::Release);
        let result = self
            .inner
            .session
            .run(|api| async move { api.refresh_all_states().await })
            .await;
        if result.is_err() {
            self.inner.refresh_pending.store(false, Ordering::Release);
        }
        result
    }

    /// Ask the gateway to republish the states of one device.
    pub async fn refresh_device_states(&self, url: &DeviceUrl) -> Result<(), CoreError> {
        if !self.inner.registry.contains(url) {
            return Err(CoreError::DeviceNotFound {
                device_url: url.to_string(),
            });
        }
        let raw = url.as_str().to_owned();
        self.inner
            .session
            .run(move |api| {
                let raw = raw.clone();
                async move { api.refresh_device_states(&raw).await }
            })
            .await
    }

    /// Pull the current states of one device from the portal and apply
    /// them, returning the synchronized map.
    pub async fn fetch_device_states(
        &self,
        url: &DeviceUrl,
    ) -> Result<IndexMap<String, StateValue>, CoreError> {
        if !self.inner.registry.contains(url) {
            return Err(CoreError::DeviceNotFound {
                device_url: url.to_string(),
            });
        }
        let raw = url.as_str().to_owned();
        let states = self
            .inner
            .session
            .run(move |api| {
                let raw = raw.clone();
                async move { api.get_device_states(&raw).await }
            })
            .await?;
        self.inner
            .registry
            .apply_states(url, model::state_deltas(&states));
        Ok(self.states(url).unwrap_or_default())
    }

    // ── Background machinery (driven by `poller`) ────────────────────

    pub(crate) fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub(crate) fn executions(&self) -> &Arc<ExecutionTracker> {
        &self.inner.executions
    }

    /// One guarded fetch cycle: ensure a listener, fetch, dispatch.
    ///
    /// A listener-unknown error drops the handle so the next cycle
    /// re-registers; any other error backs off for the configured retry
    /// delay without touching the handle.
    pub(crate) async fn fetch_cycle(&self, cancel: &CancellationToken) {
        if self.inner.fetch_guard.swap(true, Ordering::AcqRel) {
            trace!("previous fetch cycle still running, skipping tick");
            return;
        }
        if let Err(e) = self.fetch_cycle_inner().await {
            if e.is_listener_unknown() {
                debug!("portal dropped the event listener, re-registering next cycle");
                self.inner
                    .listener
                    .lock()
                    .expect("listener lock poisoned")
                    .take();
            } else {
                warn!(error = %e, "event fetch failed, backing off");
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.inner.config.fetch_retry) => {}
                }
            }
        }
        self.inner.fetch_guard.store(false, Ordering::Release);
    }

    async fn fetch_cycle_inner(&self) -> Result<(), CoreError> {
        let listener = {
            self.inner
                .listener
                .lock()
                .expect("listener lock poisoned")
                .clone()
        };
        let listener = match listener {
            Some(id) => id,
            None => {
                let id = self
                    .inner
                    .session
                    .run(|api| async move { api.register_event_listener().await })
                    .await?;
                *self.inner.listener.lock().expect("listener lock poisoned") = Some(id.clone());
                id
            }
        };

        let events = self
            .inner
            .session
            .run(|api| {
                let id = listener.clone();
                async move { api.fetch_events(&id).await }
            })
            .await?;

        if !events.is_empty() {
            self.inner.registry.note_event();
        }
        self.dispatch_events(events).await;
        Ok(())
    }

    /// Route a fetched batch. One malformed or unrouted event never
    /// affects the rest of the batch.
    async fn dispatch_events(&self, events: Vec<PortalEvent>) {
        for event in events {
            match event {
                PortalEvent::DeviceStateChanged {
                    device_url,
                    device_states,
                } => {
                    let url = DeviceUrl::new(device_url);
                    self.inner
                        .registry
                        .apply_states(&url, model::state_deltas(&device_states));
                }
                PortalEvent::ExecutionStateChanged {
                    exec_id,
                    new_state,
                    time_to_next_state,
                    failure_type,
                    failed_commands,
                } => {
                    self.inner.executions.handle_event(
                        &exec_id,
                        new_state,
                        time_to_next_state,
                        failure_type.as_deref(),
                        &failed_commands,
                    );
                }
                PortalEvent::ExecutionRegistered { exec_id } => {
                    trace!(exec_id, "execution registered on gateway");
                }
                PortalEvent::RefreshAllDevicesStatesCompleted { .. } => {
                    self.inner.refresh_pending.store(false, Ordering::Release);
                    debug!("full state refresh completed, reconciling topology");
                    if let Err(e) = self.resync_devices().await {
                        warn!(error = %e, "post-refresh reconciliation failed");
                    }
                }
                PortalEvent::Unknown => trace!("ignoring unrouted event"),
            }
        }
    }

    /// Full device re-fetch: assemble any new topology, then apply every
    /// listed state as a delta (no-ops coalesce away).
    pub(crate) async fn resync_devices(&self) -> Result<(), CoreError> {
        let records = self
            .inner
            .session
            .run(|api| async move { api.list_devices().await })
            .await?;
        topology::attach(&self.inner.registry, &records);
        for record in &records {
            let deltas = model::state_deltas(&record.states);
            if !deltas.is_empty() {
                self.inner
                    .registry
                    .apply_states(&DeviceUrl::new(record.device_url.clone()), deltas);
            }
        }
        self.inner.registry.note_full_refresh();
        Ok(())
    }

    /// One scheduled refresh: request it, then wait out the fallback
    /// window; a missing completion event triggers manual reconciliation.
    pub(crate) async fn run_scheduled_refresh(&self, cancel: &CancellationToken) {
        if self.inner.refresh_guard.swap(true, Ordering::AcqRel) {
            trace!("previous refresh still settling, skipping tick");
            return;
        }
        match self
            .inner
            .session
            .run(|api| async move { api.refresh_all_states().await })
            .await
        {
            Ok(()) => {
                self.inner.refresh_pending.store(true, Ordering::Release);
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.inner.config.refresh_fallback) => {
                        if self.inner.refresh_pending.swap(false, Ordering::AcqRel) {
                            warn!("refresh completion event missing, reconciling manually");
                            if let Err(e) = self.resync_devices().await {
                                warn!(error = %e, "manual reconciliation failed");
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "scheduled state refresh failed"),
        }
        self.inner.refresh_guard.store(false, Ordering::Release);
    }
}
