// MIT License - Copyright (c) 2026 Peter Wright
// Live panel state

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, RwLock};
use tracing::debug;

use super::partition::{alarm_state_for, AlarmState, PartitionStateKind};
use crate::constants::StatusKind;
use crate::error::{Result, SatelError};

/// Last value reported by a temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub value: f32,
    pub read_at: DateTime<Utc>,
}

/// Outcome handed to a temperature reader.
pub(crate) type WaitOutcome = Result<Option<f32>>;

type Waiter = (u64, oneshot::Sender<WaitOutcome>);

#[derive(Debug, Default)]
struct CacheInner {
    connected: bool,
    /// Pushed partition kinds; empty sets are never stored
    partitions: BTreeMap<PartitionStateKind, BTreeSet<u32>>,
    zones_violated: BTreeSet<u32>,
    outputs_active: BTreeSet<u32>,
    temperatures: HashMap<u32, TemperatureReading>,
}

impl CacheInner {
    fn apply_partition(&mut self, state: PartitionStateKind, ids: BTreeSet<u32>) -> bool {
        let before = self.partitions.clone();
        if state.is_arming() {
            for other in PartitionStateKind::ARMING.iter().filter(|&&k| k != state) {
                if let Some(set) = self.partitions.get_mut(other) {
                    set.retain(|id| !ids.contains(id));
                }
            }
        }
        self.partitions.insert(state, ids);
        self.partitions.retain(|_, ids| !ids.is_empty());
        before != self.partitions
    }
}

fn replace(set: &mut BTreeSet<u32>, ids: BTreeSet<u32>) -> bool {
    if *set == ids {
        return false;
    }
    *set = ids;
    true
}

/// Process-wide view of the panel, written only by the session loop.
///
/// Readers always get a consistent copy. Temperature readers park a oneshot
/// sender here and are woken by the next reading for their sensor.
#[derive(Debug)]
pub struct StateCache {
    configured_partitions: BTreeSet<u32>,
    inner: RwLock<CacheInner>,
    waiters: Mutex<HashMap<u32, Vec<Waiter>>>,
    next_waiter: AtomicU64,
}

impl StateCache {
    pub fn new(configured_partitions: impl IntoIterator<Item = u32>) -> Self {
        Self {
            configured_partitions: configured_partitions.into_iter().collect(),
            inner: RwLock::new(CacheInner::default()),
            waiters: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(1),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.connected
    }

    /// Returns true if the flag flipped.
    pub async fn set_connected(&self, connected: bool) -> bool {
        let mut inner = self.inner.write().await;
        let changed = inner.connected != connected;
        inner.connected = connected;
        changed
    }

    /// Replace the id set of one status kind. Returns whether the visible
    /// state changed; identical pushes return false.
    pub async fn apply_status(&self, kind: StatusKind, ids: BTreeSet<u32>) -> bool {
        let mut inner = self.inner.write().await;
        let changed = match PartitionStateKind::from_status(kind) {
            Some(state) => inner.apply_partition(state, ids),
            None if kind == StatusKind::ZonesViolated => replace(&mut inner.zones_violated, ids),
            None => replace(&mut inner.outputs_active, ids),
        };
        if changed {
            debug!("State changed: {}", kind.description());
        }
        changed
    }

    /// Snapshot of every partition kind, including the derived `Disarmed`.
    pub async fn partition_states(&self) -> BTreeMap<PartitionStateKind, BTreeSet<u32>> {
        let inner = self.inner.read().await;
        self.snapshot(&inner)
    }

    fn snapshot(&self, inner: &CacheInner) -> BTreeMap<PartitionStateKind, BTreeSet<u32>> {
        let mut out: BTreeMap<_, _> = PartitionStateKind::ALL
            .iter()
            .map(|&kind| (kind, inner.partitions.get(&kind).cloned().unwrap_or_default()))
            .collect();
        let armed: BTreeSet<u32> = PartitionStateKind::ARMING
            .iter()
            .filter_map(|kind| inner.partitions.get(kind))
            .flatten()
            .copied()
            .collect();
        out.insert(
            PartitionStateKind::Disarmed,
            self.configured_partitions.difference(&armed).copied().collect(),
        );
        out
    }

    /// `None` while disconnected: the cached state may be stale.
    pub async fn alarm_state(&self, partition: u32) -> Option<AlarmState> {
        let inner = self.inner.read().await;
        if !inner.connected {
            return None;
        }
        Some(alarm_state_for(&self.snapshot(&inner), partition))
    }

    pub async fn violated_zones(&self) -> BTreeSet<u32> {
        self.inner.read().await.zones_violated.clone()
    }

    pub async fn active_outputs(&self) -> BTreeSet<u32> {
        self.inner.read().await.outputs_active.clone()
    }

    pub async fn temperature(&self, sensor: u32) -> Option<TemperatureReading> {
        self.inner.read().await.temperatures.get(&sensor).copied()
    }

    /// Store a reading and wake every reader waiting on that sensor. Returns
    /// the number of readers woken.
    pub async fn record_temperature(&self, sensor: u32, value: Option<f32>) -> usize {
        if let Some(value) = value {
            self.inner.write().await.temperatures.insert(
                sensor,
                TemperatureReading {
                    value,
                    read_at: Utc::now(),
                },
            );
        }

        let waiters = self.waiters.lock().remove(&sensor).unwrap_or_default();
        let woken = waiters.len();
        for (_, tx) in waiters {
            // Receiver may have given up already
            let _ = tx.send(Ok(value));
        }
        woken
    }

    /// Wake every reader waiting on `sensor` with the error built by `err`.
    /// Used when the poll itself fails and no reading will follow.
    pub(crate) fn fail_waiters(&self, sensor: u32, err: impl Fn() -> SatelError) -> usize {
        let waiters = self.waiters.lock().remove(&sensor).unwrap_or_default();
        let failed = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(err()));
        }
        if failed > 0 {
            debug!("Temperature poll for sensor {} failed, {} readers released", sensor, failed);
        }
        failed
    }

    /// Park a reader for `sensor`. The flag is true when no other reader
    /// was already waiting, i.e. when the caller must issue the poll.
    pub(crate) fn add_waiter(&self, sensor: u32) -> (u64, oneshot::Receiver<WaitOutcome>, bool) {
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let list = waiters.entry(sensor).or_default();
        let first = list.is_empty();
        list.push((id, tx));
        (id, rx, first)
    }

    pub(crate) fn remove_waiter(&self, sensor: u32, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(&sensor) {
            list.retain(|(waiter, _)| *waiter != id);
            if list.is_empty() {
                waiters.remove(&sensor);
            }
        }
    }

    /// Number of readers currently parked on `sensor`.
    pub fn pending_waiters(&self, sensor: u32) -> usize {
        self.waiters.lock().get(&sensor).map_or(0, Vec::len)
    }
}
