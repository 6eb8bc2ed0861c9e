// MIT License - Copyright (c) 2026 Peter Wright
// Event fan-out

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::StatusKind;

/// Events emitted by the panel.
///
/// Users subscribe via `panel.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`, or register a callback with
/// `panel.subscribe_with()`.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// TCP connection to the panel established
    Connected,
    /// TCP connection lost
    Disconnected,
    /// The cached state of a status kind changed. `kind` is `None` when
    /// several changes were coalesced for a lagging subscriber.
    StateChanged { kind: Option<StatusKind> },
    /// A temperature reading arrived (`None` = sensor value undetermined)
    TemperatureRead { sensor: u32, value: Option<f32> },
}

/// Type alias for the broadcast sender.
pub type EventSender = broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = broadcast::Receiver<PanelEvent>;

/// Fan-out of panel events to any number of independent subscribers.
/// Emitting never blocks; slow subscribers lag instead.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: EventSender,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: PanelEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    /// Run `handler` for every event on a dedicated task until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe_with<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(PanelEvent) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Subscriber lagged, {} events coalesced", missed);
                        handler(PanelEvent::StateChanged { kind: None });
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event channel closed, subscriber exiting");
                        break;
                    }
                }
            }
        });
        Subscription {
            handle: Some(handle),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle to a callback subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribers_are_independent() {
        let notifier = EventNotifier::new(16);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.emit(PanelEvent::Connected);
        assert_eq!(a.recv().await.unwrap(), PanelEvent::Connected);
        assert_eq!(b.recv().await.unwrap(), PanelEvent::Connected);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let notifier = EventNotifier::new(4);
        notifier.emit(PanelEvent::Disconnected);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_with_and_unsubscribe() {
        let notifier = EventNotifier::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = notifier.subscribe_with(move |e| sink.lock().unwrap().push(e));

        notifier.emit(PanelEvent::StateChanged {
            kind: Some(StatusKind::Triggered),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(sub.is_active());

        sub.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.emit(PanelEvent::Connected);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_coalesced_change() {
        let notifier = EventNotifier::new(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        // Fill the channel before the forwarding task gets to run
        let _sub = notifier.subscribe_with(move |e| sink.lock().unwrap().push(e));
        for _ in 0..5 {
            notifier.emit(PanelEvent::StateChanged {
                kind: Some(StatusKind::ArmedMode0),
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], PanelEvent::StateChanged { kind: None });
        assert_eq!(seen.len(), 3);
    }
}
