// MIT License - Copyright (c) 2026 Peter Wright
// TCP connection to the ETHM module

use std::time::Instant;

use futures::SinkExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::config::PanelConfig;
use crate::error::{Result, SatelError};
use crate::protocol::Frame;

/// Incoming frames of one connection. Ends when the socket closes.
pub type FrameStream = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameSink = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Long-lived connection to the panel.
///
/// The read half is handed to the session loop as a [`FrameStream`]; the
/// write half stays here behind a mutex so any task can [`send`](Self::send).
pub struct Connection {
    config: PanelConfig,
    writer: Mutex<Option<FrameSink>>,
    connected: watch::Sender<bool>,
    reconnect_lock: Mutex<()>,
    last_activity: parking_lot::Mutex<Option<Instant>>,
}

impl Connection {
    pub fn new(config: PanelConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            writer: Mutex::new(None),
            connected,
            reconnect_lock: Mutex::new(()),
            last_activity: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch the connected flag; the session loop uses this to notice a
    /// failed write.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Time of the last successful read or write.
    pub fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.lock()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }

    /// One connection attempt bounded by the connect timeout.
    pub async fn connect(&self) -> Result<FrameStream> {
        let address = self.config.address();
        info!("Connecting to panel at {}", address);

        let stream = timeout(self.config.connect_timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| {
                warn!("Connect to {} timed out", address);
                SatelError::ConnectTimeout
            })?
            .map_err(|e| {
                error!("TCP connect failed: {}", e);
                SatelError::Io(e)
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        let (reader, writer) = stream.into_split();
        let codec = FrameCodec::new(self.config.integration_key.as_bytes());
        *self.writer.lock().await = Some(FramedWrite::new(writer, codec.clone()));
        self.touch();
        self.connected.send_replace(true);

        info!("Connected to panel at {}", address);
        Ok(FramedRead::new(reader, codec))
    }

    /// Initial connection: retry retryable failures up to
    /// `max_connect_retries` times with exponential backoff.
    pub async fn connect_with_retries(&self) -> Result<FrameStream> {
        let max_retries = self.config.max_connect_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt - 1);
                warn!(
                    "Connection attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
            }

            match self.connect().await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if !e.is_retryable() || attempt == max_retries {
                        return Err(e);
                    }
                    warn!("Connection error (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(SatelError::Disconnected))
    }

    /// Reconnect until it works or `shutdown` fires.
    ///
    /// Only one reconnect runs at a time. A caller that queued behind a
    /// successful reconnect gets `Ok(None)`: the connection is already up and
    /// its frames belong to whoever reconnected it.
    pub(crate) async fn reconnect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<FrameStream>> {
        let _guard = self.reconnect_lock.lock().await;
        if self.is_connected() {
            debug!("Connection already re-established by another trigger");
            return Ok(None);
        }
        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                return Err(SatelError::Shutdown);
            }
            match self.connect().await {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        "Reconnect attempt {} failed ({}), retrying in {:.1}s",
                        attempt + 1,
                        e,
                        delay.as_secs_f64()
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Write one frame. A failed write marks the connection down.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(SatelError::Disconnected);
        };
        debug!("Sending {:?}", frame);
        match sink.send(frame).await {
            Ok(()) => {
                drop(writer);
                self.touch();
                Ok(())
            }
            Err(e) => {
                error!("Failed to write frame: {}", e);
                *writer = None;
                drop(writer);
                self.connected.send_replace(false);
                Err(e)
            }
        }
    }

    /// Drop the writer and flip the connected flag. Idempotent.
    pub async fn mark_disconnected(&self) {
        self.writer.lock().await.take();
        if self.connected.send_replace(false) {
            info!("Connection to panel marked down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::net::TcpListener;

    use crate::error::ResultCode;

    fn config_for(port: u16) -> PanelConfig {
        PanelConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout_ms(500)
            .reconnect_delay_ms(10)
            .max_reconnect_delay_ms(50)
            .max_connect_retries(0)
            .build()
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let conn = Connection::new(config_for(1));
        let err = conn.send(Frame::response(1, ResultCode::Ok)).await.unwrap_err();
        assert!(matches!(err, SatelError::Disconnected));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (r, w) = socket.into_split();
            let mut rx = FramedRead::new(r, FrameCodec::default());
            let mut tx = FramedWrite::new(w, FrameCodec::default());
            let frame = rx.next().await.unwrap().unwrap().unwrap();
            tx.send(Frame::response(frame.correlation_id(), ResultCode::Ok))
                .await
                .unwrap();
        });

        let conn = Connection::new(config_for(port));
        let mut stream = conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert!(conn.last_activity().is_some());

        conn.send(Frame::Request {
            correlation_id: 9,
            command: crate::protocol::Command::KeepAlive,
        })
        .await
        .unwrap();
        let reply = stream.next().await.unwrap().unwrap().unwrap();
        assert_eq!(reply, Frame::response(9, ResultCode::Ok));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_disconnected_is_idempotent() {
        let conn = Connection::new(config_for(1));
        let mut watch = conn.watch_connected();
        conn.mark_disconnected().await;
        conn.mark_disconnected().await;
        assert!(!*watch.borrow_and_update());
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_open_one_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let server = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                sockets.push(socket);
            }
        });

        let conn = Connection::new(config_for(port));
        let (_tx, rx) = watch::channel(false);
        let (mut rx1, mut rx2) = (rx.clone(), rx);
        let (a, b) = tokio::join!(conn.reconnect(&mut rx1), conn.reconnect(&mut rx2));
        let (a, b) = (a.unwrap(), b.unwrap());

        // Exactly one caller owns the new stream
        assert!(a.is_some() != b.is_some());
        assert!(conn.is_connected());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        server.abort();
    }

    #[tokio::test]
    async fn test_reconnect_stops_on_shutdown() {
        // Nothing listens on this port once the listener is dropped
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let conn = Connection::new(config_for(port));
        let (tx, mut rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            let _ = tx.send(true);
        });
        let err = conn.reconnect(&mut rx).await.unwrap_err();
        assert!(matches!(err, SatelError::Shutdown));
        stopper.await.unwrap();
    }
}
