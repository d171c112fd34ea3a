use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, trace, warn};

use timegate_core_types::{StatusEvent, StatusLevel};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no active subscribers")]
    NoSubscribers,
}

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), BusError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// Simple in-memory bus used by every runtime component.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    /// Publish without caring whether anyone is listening.
    pub fn publish_lossy(&self, event: E) {
        if self.sender.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), BusError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| BusError::NoSubscribers)
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Sink for process status events, consumed by an external presentation layer.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

pub type StatusBus = InMemoryBus<StatusEvent>;

impl StatusSink for InMemoryBus<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        self.publish_lossy(event);
    }
}

impl<S> StatusSink for Arc<S>
where
    S: StatusSink + ?Sized,
{
    fn emit(&self, event: StatusEvent) {
        (**self).emit(event)
    }
}

/// Sink that only writes status events to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event.level {
            StatusLevel::Info => info!(target_id = %event.id, state = %event.state, "{}", event.message),
            StatusLevel::Warn => warn!(target_id = %event.id, state = %event.state, "{}", event.message),
            StatusLevel::Error => {
                error!(target_id = %event.id, state = %event.state, "{}", event.message)
            }
        }
    }
}

/// Helper to materialise an mpsc receiver from the bus subscription
/// so callers can await events without handling broadcast semantics directly.
pub fn to_mpsc<E>(bus: Arc<InMemoryBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use timegate_core_types::{ProcessState, TargetId};

    #[tokio::test]
    async fn publish_without_subscribers_reports_error() {
        let bus: Arc<InMemoryBus<u32>> = InMemoryBus::new(4);
        assert_eq!(bus.publish(1).await, Err(BusError::NoSubscribers));
    }

    #[tokio::test]
    async fn status_sink_emit_never_fails() {
        let bus = StatusBus::new(8);
        bus.emit(StatusEvent::new("a".into(), ProcessState::Starting, "lost"));

        let mut rx = bus.subscribe();
        bus.emit(StatusEvent::new(
            TargetId::new("a"),
            ProcessState::Navigating,
            "seen",
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.state, ProcessState::Navigating);
        assert_eq!(event.message, "seen");
    }

    #[tokio::test]
    async fn to_mpsc_forwards_events_in_order() {
        let bus: Arc<InMemoryBus<u32>> = InMemoryBus::new(16);
        let mut rx = to_mpsc(Arc::clone(&bus), 16);
        tokio::task::yield_now().await;
        for value in 0..3 {
            bus.publish_lossy(value);
        }
        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }
}
