// ── Execution tracking ──
//
// Submits command batches and correlates the asynchronous completion and
// failure events back to them. The gateway runs at most a fixed number of
// executions at once; submissions past that cap are never rejected, they
// wait on a fixed backoff until a slot frees. A local watchdog drops any
// execution whose terminal event the feed silently loses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use domus_api::models::{
    ActionDefinition, ApplyRequest, CommandRequest, ExecutionState, FailedCommand,
};

use crate::error::CoreError;
use crate::model::DeviceUrl;
use crate::session::SessionManager;

const UPDATE_CHANNEL_SIZE: usize = 128;

/// One command addressed to a device.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub parameters: Vec<serde_json::Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(
        name: impl Into<String>,
        parameters: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// Commands for one device within a batch.
#[derive(Debug, Clone)]
pub struct Action {
    pub device_url: DeviceUrl,
    pub commands: Vec<Command>,
}

/// Terminal outcome of an execution or of one command in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    /// Synthesized locally when no terminal event arrived in time.
    TimedOut,
}

/// Progress notification fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum ExecutionUpdate {
    /// The remote state advanced without settling.
    StateChanged {
        exec_id: String,
        state: ExecutionState,
    },
    /// One command of a batch settled. A batch is not all-or-nothing:
    /// a partial failure settles the named commands as `Failed` and the
    /// rest as `Completed`.
    CommandSettled {
        exec_id: String,
        device_url: DeviceUrl,
        command: String,
        outcome: ExecutionOutcome,
        failure: Option<String>,
    },
    /// The execution settled and left tracking.
    Finished {
        exec_id: String,
        outcome: ExecutionOutcome,
        failure: Option<String>,
    },
}

/// A tracked, not-yet-terminal execution.
#[derive(Debug, Clone)]
pub struct PendingExecution {
    pub exec_id: String,
    /// Every `(device, command)` pair in the batch, in submission order.
    pub commands: Vec<(DeviceUrl, String)>,
    pub high_priority: bool,
    pub state: ExecutionState,
}

struct Pool {
    executions: HashMap<String, PendingExecution>,
    /// Slots claimed by in-flight submissions not yet answered by the
    /// portal. Counted against the cap so racing submissions cannot
    /// overshoot it.
    reserved: usize,
}

/// Bookkeeping shared with the watchdog tasks.
struct TrackerShared {
    pool: Mutex<Pool>,
    updates: broadcast::Sender<Arc<ExecutionUpdate>>,
    /// Pending-count watch; the poll loop derives its cadence from it.
    activity: watch::Sender<usize>,
}

impl TrackerShared {
    fn pending_count(&self) -> usize {
        self.pool.lock().expect("pool lock poisoned").executions.len()
    }

    fn publish_activity(&self) {
        let _ = self.activity.send(self.pending_count());
    }

    /// Watchdog path: force the execution out of tracking as timed out.
    fn expire(&self, exec_id: &str) {
        let removed = {
            let mut pool = self.pool.lock().expect("pool lock poisoned");
            pool.executions.remove(exec_id)
        };
        if removed.is_some() {
            warn!(
                exec_id,
                "no terminal event within the timeout window, dropping execution"
            );
            self.publish_activity();
            let _ = self.updates.send(Arc::new(ExecutionUpdate::Finished {
                exec_id: exec_id.to_owned(),
                outcome: ExecutionOutcome::TimedOut,
                failure: None,
            }));
        }
    }
}

/// Tracks every outstanding execution of one hub connection.
pub(crate) struct ExecutionTracker {
    session: Arc<SessionManager>,
    shared: Arc<TrackerShared>,
    capacity: usize,
    admission_backoff: Duration,
    timeout: Duration,
    /// Replaced per connection; watchdogs and admission waits die with it.
    cancel: RwLock<CancellationToken>,
}

impl ExecutionTracker {
    pub(crate) fn new(
        session: Arc<SessionManager>,
        capacity: usize,
        admission_backoff: Duration,
        timeout: Duration,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let (activity, _) = watch::channel(0);
        Arc::new(Self {
            session,
            shared: Arc::new(TrackerShared {
                pool: Mutex::new(Pool {
                    executions: HashMap::new(),
                    reserved: 0,
                }),
                updates,
                activity,
            }),
            capacity,
            admission_backoff,
            timeout,
            cancel: RwLock::new(CancellationToken::new()),
        })
    }

    /// Start a fresh connection epoch: drop stale bookkeeping and adopt
    /// the connection's cancellation token.
    pub(crate) fn reset(&self, cancel: CancellationToken) {
        {
            let mut pool = self.shared.pool.lock().expect("pool lock poisoned");
            pool.executions.clear();
            pool.reserved = 0;
        }
        *self.cancel.write().expect("cancel lock poisoned") = cancel;
        let _ = self.shared.activity.send(0);
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Snapshot of everything currently tracked.
    pub(crate) fn pending(&self) -> Vec<PendingExecution> {
        self.shared
            .pool
            .lock()
            .expect("pool lock poisoned")
            .executions
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Arc<ExecutionUpdate>> {
        self.shared.updates.subscribe()
    }

    /// Watch of the pending-execution count.
    pub(crate) fn subscribe_activity(&self) -> watch::Receiver<usize> {
        self.shared.activity.subscribe()
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Submit a command batch, waiting for a free slot when the pool is
    /// at capacity. Never rejects on capacity; gives up only when the
    /// connection is torn down or the portal fails the request outright.
    pub(crate) async fn submit(
        &self,
        actions: &[Action],
        label: String,
        high_priority: bool,
    ) -> Result<String, CoreError> {
        let request = ApplyRequest {
            label,
            actions: actions
                .iter()
                .map(|a| ActionDefinition {
                    device_url: a.device_url.as_str().to_owned(),
                    commands: a
                        .commands
                        .iter()
                        .map(|c| CommandRequest {
                            name: c.name.clone(),
                            parameters: c.parameters.clone(),
                        })
                        .collect(),
                })
                .collect(),
        };
        let commands: Vec<(DeviceUrl, String)> = actions
            .iter()
            .flat_map(|a| {
                a.commands
                    .iter()
                    .map(|c| (a.device_url.clone(), c.name.clone()))
            })
            .collect();
        let cancel = self.cancel_token();

        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::NotConnected);
            }

            if self.try_reserve() {
                let result = self
                    .session
                    .run(|api| {
                        let request = request.clone();
                        async move { api.apply_actions(&request, high_priority).await }
                    })
                    .await;
                match result {
                    Ok(exec_id) => {
                        self.commit_reservation(PendingExecution {
                            exec_id: exec_id.clone(),
                            commands,
                            high_priority,
                            state: ExecutionState::Initialized,
                        });
                        return Ok(exec_id);
                    }
                    Err(e) if e.is_execution_queue_full() => {
                        self.release_reservation();
                        debug!("gateway execution queue full, backing off");
                    }
                    Err(e) => {
                        self.release_reservation();
                        return Err(e);
                    }
                }
            } else {
                debug!(
                    pending = self.pending_count(),
                    "execution pool at capacity, backing off"
                );
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(CoreError::NotConnected),
                () = tokio::time::sleep(self.admission_backoff) => {}
            }
        }
    }

    /// Ask the portal to cancel a running execution. Best-effort: local
    /// bookkeeping is untouched, the terminal (or timeout) path removes
    /// the entry once the portal settles it.
    pub(crate) async fn request_cancel(&self, exec_id: &str) -> Result<(), CoreError> {
        let exec_id = exec_id.to_owned();
        self.session
            .run(move |api| {
                let exec_id = exec_id.clone();
                async move { api.cancel_execution(&exec_id).await }
            })
            .await
    }

    // ── Event correlation ────────────────────────────────────────────

    /// Apply an execution-state event to the tracked entry, settling the
    /// execution when the event is terminal. `time_to_next_state == -1`
    /// is authoritative: the entry is removed regardless of the reported
    /// state value.
    pub(crate) fn handle_event(
        &self,
        exec_id: &str,
        new_state: ExecutionState,
        time_to_next_state: i64,
        failure_type: Option<&str>,
        failed_commands: &[FailedCommand],
    ) {
        let terminal = new_state.is_terminal() || time_to_next_state == -1;
        let settled = {
            let mut pool = self.shared.pool.lock().expect("pool lock poisoned");
            let Some(exec) = pool.executions.get_mut(exec_id) else {
                trace!(exec_id, "event for untracked execution ignored");
                return;
            };
            exec.state = new_state;
            if terminal {
                pool.executions.remove(exec_id)
            } else {
                None
            }
        };

        match settled {
            None => {
                trace!(exec_id, ?new_state, "execution advanced");
                let _ = self
                    .shared
                    .updates
                    .send(Arc::new(ExecutionUpdate::StateChanged {
                        exec_id: exec_id.to_owned(),
                        state: new_state,
                    }));
            }
            Some(exec) => {
                self.shared.publish_activity();
                self.settle(&exec, new_state, failure_type, failed_commands);
            }
        }
    }

    /// Report per-command outcomes and the execution-level outcome.
    fn settle(
        &self,
        exec: &PendingExecution,
        state: ExecutionState,
        failure_type: Option<&str>,
        failed_commands: &[FailedCommand],
    ) {
        let batch_failed = state == ExecutionState::Failed;
        let any_failure = batch_failed || failure_type.is_some() || !failed_commands.is_empty();

        for (device_url, command) in &exec.commands {
            let failed = if failed_commands.is_empty() {
                batch_failed
            } else {
                failed_commands.iter().any(|fc| {
                    fc.device_url == device_url.as_str()
                        && fc.command.as_deref().is_none_or(|c| c == command)
                })
            };
            let _ = self
                .shared
                .updates
                .send(Arc::new(ExecutionUpdate::CommandSettled {
                    exec_id: exec.exec_id.clone(),
                    device_url: device_url.clone(),
                    command: command.clone(),
                    outcome: if failed {
                        ExecutionOutcome::Failed
                    } else {
                        ExecutionOutcome::Completed
                    },
                    failure: if failed {
                        failure_type.map(str::to_owned)
                    } else {
                        None
                    },
                }));
        }

        let outcome = if any_failure {
            ExecutionOutcome::Failed
        } else {
            ExecutionOutcome::Completed
        };
        debug!(exec_id = %exec.exec_id, ?outcome, "execution settled");
        let _ = self
            .shared
            .updates
            .send(Arc::new(ExecutionUpdate::Finished {
                exec_id: exec.exec_id.clone(),
                outcome,
                failure: failure_type.map(str::to_owned),
            }));
    }

    // ── Internals ────────────────────────────────────────────────────

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.read().expect("cancel lock poisoned").clone()
    }

    /// Claim a slot if the pool (tracked + in-flight) is under capacity.
    fn try_reserve(&self) -> bool {
        let mut pool = self.shared.pool.lock().expect("pool lock poisoned");
        if pool.executions.len() + pool.reserved < self.capacity {
            pool.reserved += 1;
            true
        } else {
            false
        }
    }

    fn release_reservation(&self) {
        let mut pool = self.shared.pool.lock().expect("pool lock poisoned");
        pool.reserved = pool.reserved.saturating_sub(1);
    }

    /// Turn a reservation into a tracked execution and arm its watchdog.
    fn commit_reservation(&self, exec: PendingExecution) {
        let exec_id = exec.exec_id.clone();
        {
            let mut pool = self.shared.pool.lock().expect("pool lock poisoned");
            pool.reserved = pool.reserved.saturating_sub(1);
            if pool.executions.insert(exec_id.clone(), exec).is_some() {
                warn!(exec_id, "duplicate execution id from portal, replacing");
            }
        }
        self.shared.publish_activity();

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel_token();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => shared.expire(&exec_id),
            }
        });
    }
}
