// ── Reactive device registry ──
//
// Concurrent storage for every device known to the hub, with per-device
// change notification. Incoming state deltas are applied to the device
// record immediately; notifications are debounced so a burst of writes
// within the window produces one batch per device, not one event per
// value.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::model::{Device, DeviceUrl, StateValue};

/// How long rapid state writes to one device coalesce before a single
/// notification fires.
pub(crate) const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

const STATE_CHANNEL_SIZE: usize = 64;

/// One coalesced batch of state changes for a single device.
#[derive(Debug, Clone)]
pub struct StatesChanged {
    pub device_url: DeviceUrl,
    /// Final distinct value of every state that changed within the
    /// debounce window, in first-write order.
    pub states: Vec<(String, StateValue)>,
}

struct PendingStates {
    values: IndexMap<String, StateValue>,
    flush_scheduled: bool,
}

/// A registered device plus its notification machinery.
struct DeviceEntry {
    device: RwLock<Device>,
    changes: broadcast::Sender<Arc<StatesChanged>>,
    pending: Mutex<PendingStates>,
}

impl DeviceEntry {
    fn new(device: Device) -> Self {
        let (changes, _) = broadcast::channel(STATE_CHANNEL_SIZE);
        Self {
            device: RwLock::new(device),
            changes,
            pending: Mutex::new(PendingStates {
                values: IndexMap::new(),
                flush_scheduled: false,
            }),
        }
    }

    fn snapshot(&self) -> Device {
        self.device.read().expect("device lock poisoned").clone()
    }

    /// Drain the pending batch and notify subscribers, if anything changed.
    fn flush(&self) {
        let batch = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.flush_scheduled = false;
            if pending.values.is_empty() {
                return;
            }
            std::mem::take(&mut pending.values)
        };
        let device_url = {
            self.device
                .read()
                .expect("device lock poisoned")
                .device_url
                .clone()
        };
        trace!(%device_url, changed = batch.len(), "flushing coalesced state batch");
        let _ = self.changes.send(Arc::new(StatesChanged {
            device_url,
            states: batch.into_iter().collect(),
        }));
    }
}

/// Registry of all devices known to a hub connection.
///
/// Devices are registered once and never destroyed during a session;
/// a topology re-fetch reconciles into existing records so subscribers
/// survive it.
pub struct DeviceRegistry {
    devices: DashMap<DeviceUrl, Arc<DeviceEntry>>,
    /// Physical (top-level) device URLs, in first-seen order.
    roots: RwLock<Vec<DeviceUrl>>,
    /// Bumped on every registration.
    version: watch::Sender<u64>,
    last_event_at: watch::Sender<Option<DateTime<Utc>>>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (last_event_at, _) = watch::channel(None);
        let (last_full_refresh, _) = watch::channel(None);
        Self {
            devices: DashMap::new(),
            roots: RwLock::new(Vec::new()),
            version,
            last_event_at,
            last_full_refresh,
        }
    }

    // ── Registration (topology layer) ────────────────────────────────

    /// Register a device unless one with the same URL already exists.
    /// Existing records are never replaced. Returns `true` if inserted.
    pub(crate) fn register(&self, device: Device) -> bool {
        let url = device.device_url.clone();
        if self.devices.contains_key(&url) {
            trace!(%url, "device already registered, keeping existing record");
            return false;
        }
        self.devices.insert(url, Arc::new(DeviceEntry::new(device)));
        self.version.send_modify(|v| *v += 1);
        true
    }

    /// Record a device URL as a top-level physical device.
    pub(crate) fn mark_root(&self, url: &DeviceUrl) {
        let mut roots = self.roots.write().expect("roots lock poisoned");
        if !roots.contains(url) {
            roots.push(url.clone());
        }
    }

    /// Append a sensor to its owner's sensor list.
    pub(crate) fn attach_sensor(&self, owner: &DeviceUrl, sensor: &DeviceUrl) {
        if let Some(entry) = self.devices.get(owner) {
            let mut device = entry.device.write().expect("device lock poisoned");
            if !device.sensors.contains(sensor) {
                device.sensors.push(sensor.clone());
            }
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn contains(&self, url: &DeviceUrl) -> bool {
        self.devices.contains_key(url)
    }

    /// Snapshot of a single device.
    pub fn get(&self, url: &DeviceUrl) -> Option<Device> {
        self.devices.get(url).map(|entry| entry.snapshot())
    }

    /// Snapshots of the top-level physical devices, in first-seen order.
    pub fn top_level(&self) -> Vec<Device> {
        let roots = self.roots.read().expect("roots lock poisoned").clone();
        roots.iter().filter_map(|url| self.get(url)).collect()
    }

    /// Snapshots of every registered device, sensors included.
    pub fn all(&self) -> Vec<Device> {
        self.devices
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe to coalesced state-change batches of one device.
    pub fn subscribe_states(
        &self,
        url: &DeviceUrl,
    ) -> Option<broadcast::Receiver<Arc<StatesChanged>>> {
        self.devices.get(url).map(|entry| entry.changes.subscribe())
    }

    /// Subscribe to topology growth (bumped whenever a device registers).
    pub fn subscribe_topology(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// When the last event touched this registry.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        *self.last_event_at.borrow()
    }

    /// When the last full reconciliation completed.
    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    // ── State synchronization ────────────────────────────────────────

    /// Apply incoming state deltas to a device record.
    ///
    /// Unknown state names are added, differing values updated, equal
    /// values ignored. Changed values accumulate into the device's
    /// pending batch; the first change in a window schedules a flush
    /// that fires one notification with the final distinct values.
    pub(crate) fn apply_states(&self, url: &DeviceUrl, deltas: Vec<(String, StateValue)>) {
        let Some(entry) = self.devices.get(url).map(|r| Arc::clone(r.value())) else {
            debug!(%url, "state change for unknown device ignored");
            return;
        };

        let mut changed: Vec<(String, StateValue)> = Vec::new();
        {
            let mut device = entry.device.write().expect("device lock poisoned");
            for (name, value) in deltas {
                match device.states.get(&name) {
                    Some(existing) if *existing == value => {}
                    _ => {
                        device.states.insert(name.clone(), value.clone());
                        changed.push((name, value));
                    }
                }
            }
        }
        if changed.is_empty() {
            return;
        }

        let schedule = {
            let mut pending = entry.pending.lock().expect("pending lock poisoned");
            for (name, value) in changed {
                pending.values.insert(name, value);
            }
            !std::mem::replace(&mut pending.flush_scheduled, true)
        };
        if schedule {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move {
                tokio::time::sleep(DEBOUNCE_WINDOW).await;
                entry.flush();
            });
        }
    }

    pub(crate) fn note_event(&self) {
        let _ = self.last_event_at.send(Some(Utc::now()));
    }

    pub(crate) fn note_full_refresh(&self) {
        let _ = self.last_full_refresh.send(Some(Utc::now()));
    }
}
