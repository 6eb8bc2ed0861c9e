// MIT License - Copyright (c) 2026 Peter Wright
// Public panel API

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::comm::Session;
use crate::config::{ArmMode, PanelConfig};
use crate::error::{ErrorKind, Result, SatelError};
use crate::event::{EventNotifier, EventReceiver, PanelEvent, Subscription};
use crate::protocol::Command;
use crate::state::{AlarmState, PartitionStateKind, StateCache, TemperatureReading};
use crate::transport::{CommandDispatcher, Connection};

/// Removes a temperature reader from the cache however the wait ends.
struct WaiterGuard<'a> {
    cache: &'a StateCache,
    sensor: u32,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.cache.remove_waiter(self.sensor, self.id);
    }
}

/// Client for a Satel Integra panel.
///
/// Construct once with [`SatelPanel::connect`] and share it (e.g. in an
/// `Arc`). The connection is kept alive in the background and re-established
/// after failures; commands fail fast while it is down.
///
/// # Example
///
/// ```no_run
/// use satel_integra::{PanelConfig, SatelPanel};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .host("192.168.1.50")
///         .partitions([1, 2])
///         .temperature_sensors([17])
///         .build();
///
///     let panel = SatelPanel::connect(config).await?;
///
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     panel.arm("1234", &[1], None).await?;
///     let celsius = panel.read_temp_and_wait(17).await?;
///     println!("Sensor 17: {celsius} °C");
///
///     tokio::signal::ctrl_c().await?;
///     panel.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct SatelPanel {
    config: PanelConfig,
    connection: Arc<Connection>,
    dispatcher: Arc<CommandDispatcher>,
    cache: Arc<StateCache>,
    events: EventNotifier,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SatelPanel {
    /// Validate the config, connect (retrying transient failures) and start
    /// the background session.
    pub async fn connect(config: PanelConfig) -> Result<Self> {
        config.validate()?;

        let connection = Arc::new(Connection::new(config.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            connection.clone(),
            config.command_timeout(),
        ));
        let cache = Arc::new(StateCache::new(config.partitions.iter().copied()));
        let events = EventNotifier::new(config.event_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let frames = connection.connect_with_retries().await?;

        let session = Arc::new(Session::new(
            config.clone(),
            connection.clone(),
            dispatcher.clone(),
            cache.clone(),
            events.clone(),
        ));
        let mut tasks = vec![tokio::spawn(
            session.clone().run(frames, shutdown_rx.clone()),
        )];
        if let Some(interval) = config.keep_alive_interval() {
            tasks.push(tokio::spawn(session.keep_alive(interval, shutdown_rx)));
        }

        info!("Panel client started for {}", config.address());
        Ok(Self {
            config,
            connection,
            dispatcher,
            cache,
            events,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    // --- State accessors ---

    /// Every partition state kind with the partitions currently in it.
    pub async fn partition_states(&self) -> BTreeMap<PartitionStateKind, BTreeSet<u32>> {
        self.cache.partition_states().await
    }

    pub async fn violated_zones(&self) -> BTreeSet<u32> {
        self.cache.violated_zones().await
    }

    pub async fn active_outputs(&self) -> BTreeSet<u32> {
        self.cache.active_outputs().await
    }

    /// Last reading of a sensor, if any arrived.
    pub async fn temperature(&self, sensor: u32) -> Option<TemperatureReading> {
        self.cache.temperature(sensor).await
    }

    /// UI alarm state of a partition; `None` while disconnected.
    pub async fn alarm_state(&self, partition: u32) -> Option<AlarmState> {
        self.cache.alarm_state(partition).await
    }

    /// Readers currently waiting on a sensor.
    pub fn pending_temperature_reads(&self, sensor: u32) -> usize {
        self.cache.pending_waiters(sensor)
    }

    // --- Commands ---

    /// Arm partitions. `None` arms in mode 0 (full/away).
    pub async fn arm(&self, code: &str, partitions: &[u32], mode: Option<ArmMode>) -> Result<()> {
        let mode = mode.unwrap_or_default();
        let command = Command::arm(code, partitions, mode)?;
        info!("Arming partitions {:?} (mode {})", partitions, mode.as_u8());
        self.dispatcher.execute(command).await
    }

    /// Arm partitions in the configured home mode.
    pub async fn arm_home(&self, code: &str, partitions: &[u32]) -> Result<()> {
        self.arm(code, partitions, Some(self.config.arm_home_mode)).await
    }

    pub async fn disarm(&self, code: &str, partitions: &[u32]) -> Result<()> {
        let command = Command::disarm(code, partitions)?;
        info!("Disarming partitions {:?}", partitions);
        self.dispatcher.execute(command).await
    }

    pub async fn clear_alarm(&self, code: &str, partitions: &[u32]) -> Result<()> {
        let command = Command::clear_alarm(code, partitions)?;
        info!("Clearing alarm on partitions {:?}", partitions);
        self.dispatcher.execute(command).await
    }

    /// Switch one output on or off.
    pub async fn set_output(&self, code: &str, output: u32, on: bool) -> Result<()> {
        let command = Command::set_outputs(code, &[output], on)?;
        info!("Switching output {} {}", output, if on { "on" } else { "off" });
        self.dispatcher.execute(command).await
    }

    /// Poll a temperature sensor and wait for the reading.
    ///
    /// Concurrent readers of the same sensor share one poll; if the poll
    /// fails, every one of them gets the failure. Fails with
    /// [`SatelError::TemperatureTimeout`] when no reading arrives within
    /// `temperature_timeout_ms`; the reader is unregistered in every case.
    pub async fn read_temp_and_wait(&self, sensor: u32) -> Result<f32> {
        let command = Command::read_temperature(sensor)?;

        let (id, rx, first) = self.cache.add_waiter(sensor);
        let _guard = WaiterGuard {
            cache: &self.cache,
            sensor,
            id,
        };

        if first {
            // Detached so a reader giving up does not strand the others
            let dispatcher = self.dispatcher.clone();
            let cache = self.cache.clone();
            tokio::spawn(async move {
                debug!("Polling temperature sensor {}", sensor);
                if let Err(e) = dispatcher.execute(command).await {
                    warn!("Temperature poll for sensor {} failed: {}", sensor, e);
                    cache.fail_waiters(sensor, || poll_failure(sensor, &e));
                }
            });
        }

        match timeout(self.config.temperature_timeout(), rx).await {
            Ok(Ok(Ok(Some(value)))) => Ok(value),
            Ok(Ok(Ok(None))) => Err(SatelError::TemperatureUnavailable { sensor }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(SatelError::ConnectionLost),
            Err(_) => Err(SatelError::TemperatureTimeout { sensor }),
        }
    }

    /// Read every configured sensor concurrently.
    pub async fn read_all_temperatures(&self) -> BTreeMap<u32, Result<f32>> {
        let sensors = self.config.temperature_sensors.clone();
        let reads = sensors.iter().map(|&sensor| self.read_temp_and_wait(sensor));
        sensors.iter().copied().zip(join_all(reads).await).collect()
    }

    // --- Events ---

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Call `handler` for every event until the returned handle is dropped.
    pub fn subscribe_with<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(PanelEvent) + Send + 'static,
    {
        self.events.subscribe_with(handler)
    }

    /// Stop the background session and close the connection. Pending
    /// commands fail with `ConnectionLost`.
    pub async fn disconnect(&self) {
        info!("Disconnecting from panel");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        self.connection.mark_disconnected().await;
        self.dispatcher.fail_all(|| SatelError::ConnectionLost).await;
        if self.cache.set_connected(false).await {
            self.events.emit(PanelEvent::Disconnected);
        }
    }
}

/// The error each reader sees when the shared poll for `sensor` failed.
fn poll_failure(sensor: u32, err: &SatelError) -> SatelError {
    match err {
        SatelError::Rejected(code) => SatelError::Rejected(*code),
        SatelError::Auth(code) => SatelError::Auth(*code),
        SatelError::UnknownResultCode(byte) => SatelError::UnknownResultCode(*byte),
        SatelError::Disconnected => SatelError::Disconnected,
        SatelError::TooManyPending => SatelError::TooManyPending,
        e if e.kind() == ErrorKind::Timeout => SatelError::TemperatureTimeout { sensor },
        _ => SatelError::ConnectionLost,
    }
}

impl Drop for SatelPanel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
