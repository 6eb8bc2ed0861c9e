// MIT License - Copyright (c) 2026 Peter Wright
// Session loop: frame routing, reconnection and keep-alive

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PanelConfig;
use crate::error::{ErrorKind, SatelError};
use crate::event::{EventNotifier, PanelEvent};
use crate::protocol::{Command, Frame, MonitorFlags};
use crate::state::StateCache;
use crate::transport::{CommandDispatcher, Connection, FrameStream};

/// Corrupt frames tolerated inside [`BAD_FRAME_WINDOW`] before the
/// connection is considered unusable.
const BAD_FRAME_LIMIT: u32 = 10;
const BAD_FRAME_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Lost,
    Shutdown,
}

/// Counts integrity errors in a sliding window.
#[derive(Debug, Default)]
struct BadFrameCounter {
    count: u32,
    last: Option<Instant>,
}

impl BadFrameCounter {
    /// Returns true when the limit has been exceeded.
    fn record(&mut self) -> bool {
        if self.last.is_some_and(|t| t.elapsed() > BAD_FRAME_WINDOW) {
            self.count = 0;
        }
        self.count += 1;
        self.last = Some(Instant::now());
        self.count > BAD_FRAME_LIMIT
    }
}

/// Owns the receive side of the connection and the components it feeds.
pub(crate) struct Session {
    config: PanelConfig,
    connection: Arc<Connection>,
    dispatcher: Arc<CommandDispatcher>,
    cache: Arc<StateCache>,
    events: EventNotifier,
}

impl Session {
    pub fn new(
        config: PanelConfig,
        connection: Arc<Connection>,
        dispatcher: Arc<CommandDispatcher>,
        cache: Arc<StateCache>,
        events: EventNotifier,
    ) -> Self {
        Self {
            config,
            connection,
            dispatcher,
            cache,
            events,
        }
    }

    /// Status kinds to subscribe to, given the configured numbering.
    pub fn monitor_flags(&self) -> MonitorFlags {
        let mut flags = MonitorFlags::partitions();
        if !self.config.zones.is_empty() {
            flags |= MonitorFlags::ZONES_VIOLATED;
        }
        if !self.config.outputs.is_empty() {
            flags |= MonitorFlags::OUTPUTS_ACTIVE;
        }
        flags
    }

    /// Drive the connection until shutdown: pump frames, and on loss fail
    /// pending work and reconnect with backoff.
    pub async fn run(self: Arc<Self>, initial: FrameStream, mut shutdown: watch::Receiver<bool>) {
        let mut next = Some(initial);
        loop {
            let frames = match next.take() {
                Some(frames) => frames,
                None => match self.connection.reconnect(&mut shutdown).await {
                    Ok(Some(frames)) => frames,
                    Ok(None) => {
                        // Someone else owns the live stream; wait for it to drop
                        if self.wait_for_loss(&mut shutdown).await == Exit::Shutdown {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        debug!("Session loop stopping: {}", e);
                        break;
                    }
                },
            };

            // Subscribe before anything can write, so a failed write during
            // start-up is not missed
            let connected = self.connection.watch_connected();
            self.on_connected().await;
            let exit = self.pump(frames, connected, &mut shutdown).await;
            self.on_disconnected().await;

            if exit == Exit::Shutdown {
                break;
            }
        }
        info!("Session loop finished");
    }

    async fn wait_for_loss(&self, shutdown: &mut watch::Receiver<bool>) -> Exit {
        let mut connected = self.connection.watch_connected();
        tokio::select! {
            _ = connected.wait_for(|up| !*up) => Exit::Lost,
            _ = shutdown.wait_for(|stop| *stop) => Exit::Shutdown,
        }
    }

    async fn on_connected(&self) {
        if self.cache.set_connected(true).await {
            self.events.emit(PanelEvent::Connected);
        }

        // The panel answers with the current state of every requested kind.
        // Sent from its own task: the response arrives through the pump.
        let dispatcher = self.dispatcher.clone();
        let kinds = self.monitor_flags();
        tokio::spawn(async move {
            match dispatcher.execute(Command::StartMonitoring { kinds }).await {
                Ok(()) => debug!("Monitoring started for {:?}", kinds.kinds()),
                Err(e) => warn!("Failed to start monitoring: {}", e),
            }
        });
    }

    async fn on_disconnected(&self) {
        self.connection.mark_disconnected().await;
        self.dispatcher.fail_all(|| SatelError::ConnectionLost).await;
        if self.cache.set_connected(false).await {
            self.events.emit(PanelEvent::Disconnected);
        }
    }

    async fn pump(
        &self,
        mut frames: FrameStream,
        mut connected: watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        if !*connected.borrow_and_update() {
            debug!("Connection went down before the pump started");
            return Exit::Lost;
        }
        let mut bad_frames = BadFrameCounter::default();

        loop {
            tokio::select! {
                item = frames.next() => match item {
                    Some(Ok(Ok(frame))) => {
                        self.connection.touch();
                        self.route(frame).await;
                    }
                    Some(Ok(Err(e))) => {
                        warn!("Dropped corrupt frame: {}", e);
                        if bad_frames.record() {
                            error!("Too many corrupt frames ({}), reconnecting", bad_frames.count);
                            return Exit::Lost;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Read error: {}", e);
                        return Exit::Lost;
                    }
                    None => {
                        info!("Panel closed the connection");
                        return Exit::Lost;
                    }
                },
                changed = connected.changed() => {
                    if changed.is_err() || !*connected.borrow_and_update() {
                        debug!("Connection marked down, leaving pump");
                        return Exit::Lost;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Exit::Shutdown;
                    }
                }
            }
        }
    }

    async fn route(&self, frame: Frame) {
        match frame {
            Frame::Response {
                correlation_id,
                result,
            } => {
                self.dispatcher.resolve(correlation_id, result).await;
            }
            Frame::Status { kind, ids } => {
                debug!("Status push {}: {:?}", kind.description(), ids);
                if self.cache.apply_status(kind, ids).await {
                    self.events
                        .emit(PanelEvent::StateChanged { kind: Some(kind) });
                }
            }
            Frame::Temperature { sensor, value } => {
                let woken = self.cache.record_temperature(sensor, value).await;
                debug!(
                    "Temperature sensor {}: {:?} ({} readers woken)",
                    sensor, value, woken
                );
                self.events.emit(PanelEvent::TemperatureRead { sensor, value });
            }
            Frame::Request { correlation_id, .. } => {
                warn!("Ignoring request frame from panel (corr {})", correlation_id);
            }
        }
    }

    /// Periodic keep-alive; a timed-out keep-alive forces a reconnect.
    pub async fn keep_alive(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.connection.is_connected() {
                        continue;
                    }
                    let outcome = tokio::select! {
                        result = self.dispatcher.send(Command::KeepAlive) => Some(result),
                        _ = shutdown.wait_for(|stop| *stop) => None,
                    };
                    match outcome {
                        None => {
                            debug!("Keep-alive shutting down");
                            break;
                        }
                        Some(Ok(result)) => debug!("Keep-alive answered {}", result),
                        Some(Err(e)) if e.kind() == ErrorKind::Timeout => {
                            warn!("Keep-alive timed out, forcing reconnect");
                            self.connection.mark_disconnected().await;
                        }
                        Some(Err(e)) => debug!("Keep-alive failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Keep-alive shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::StatusKind;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    /// Config pointing at a local listener that accepts but never answers.
    async fn silent_panel() -> (TcpListener, PanelConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = PanelConfig::builder()
            .host("127.0.0.1")
            .port(listener.local_addr().unwrap().port())
            .command_timeout_ms(10_000)
            .build();
        (listener, config)
    }

    fn session(config: PanelConfig) -> Session {
        let connection = Arc::new(Connection::new(config.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            connection.clone(),
            config.command_timeout(),
        ));
        Session::new(
            config.clone(),
            connection,
            dispatcher,
            Arc::new(StateCache::new(config.partitions.iter().copied())),
            EventNotifier::new(16),
        )
    }

    #[test]
    fn test_bad_frame_counter() {
        let mut counter = BadFrameCounter::default();
        for _ in 0..BAD_FRAME_LIMIT {
            assert!(!counter.record());
        }
        assert!(counter.record());
    }

    #[test]
    fn test_monitor_flags_follow_numbering() {
        let s = session(PanelConfig::builder().build());
        let flags = s.monitor_flags();
        assert!(!flags.contains(MonitorFlags::ZONES_VIOLATED));
        assert!(!flags.contains(MonitorFlags::OUTPUTS_ACTIVE));
        let partition_kinds = flags.kinds().into_iter().filter(|k| k.is_partition_kind()).count();
        assert_eq!(partition_kinds, 9);

        let s = session(PanelConfig::builder().zones([1]).outputs([2]).build());
        let flags = s.monitor_flags();
        assert!(flags.contains(MonitorFlags::ZONES_VIOLATED));
        assert!(flags.contains(MonitorFlags::OUTPUTS_ACTIVE));
    }

    #[tokio::test]
    async fn test_route_status_emits_once() {
        let s = session(PanelConfig::builder().build());
        let mut rx = s.events.subscribe();
        let frame = Frame::Status {
            kind: StatusKind::Triggered,
            ids: [1].into_iter().collect(),
        };
        s.route(frame.clone()).await;
        s.route(frame).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            PanelEvent::StateChanged {
                kind: Some(StatusKind::Triggered)
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_temperature_wakes_readers() {
        let s = session(PanelConfig::builder().build());
        let (_, waiter, _) = s.cache.add_waiter(12);
        s.route(Frame::Temperature {
            sensor: 12,
            value: Some(20.5),
        })
        .await;
        assert_eq!(waiter.await.unwrap().unwrap(), Some(20.5));
    }

    #[tokio::test]
    async fn test_pump_sees_write_failure_before_start() {
        let (listener, config) = silent_panel().await;
        let s = session(config);
        let frames = s.connection.connect().await.unwrap();
        let (_socket, _) = listener.accept().await.unwrap();

        let connected = s.connection.watch_connected();
        // A start-up write fails before the pump is polled
        s.connection.mark_disconnected().await;

        let (_tx, mut shutdown) = watch::channel(false);
        let exit = timeout(Duration::from_secs(1), s.pump(frames, connected, &mut shutdown))
            .await
            .expect("pump kept waiting on a dead connection");
        assert_eq!(exit, Exit::Lost);
    }

    #[tokio::test]
    async fn test_keep_alive_stops_while_waiting_for_answer() {
        let (listener, config) = silent_panel().await;
        let s = Arc::new(session(config));
        let _frames = s.connection.connect().await.unwrap();
        let (_socket, _) = listener.accept().await.unwrap();

        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(s.clone().keep_alive(Duration::from_millis(20), shutdown));

        // Let the first keep-alive go out and sit unanswered
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(s.dispatcher.pending_count().await, 1);

        tx.send(true).unwrap();
        timeout(Duration::from_millis(500), task)
            .await
            .expect("keep-alive ignored shutdown")
            .unwrap();
    }
}
