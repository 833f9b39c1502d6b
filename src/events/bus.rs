//! Bounded event delivery.
//!
//! Producers never block on a slow consumer: when the channel is full the
//! newest event is dropped, a warning is logged and the drop counter grows.
//! Events are delivered in the order they were emitted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

/// Default channel capacity for event streams.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Sending half of an event channel with a drop-newest overflow policy.
#[derive(Debug)]
pub struct EventSink<T> {
    tx: Option<mpsc::Sender<T>>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T: std::fmt::Debug> EventSink<T> {
    /// A sink with no receiver. Every emit is discarded silently.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delivers `event` if there is room; never waits.
    pub fn emit(&self, event: T) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Event channel full, dropping {:?} ({} dropped so far)", event, dropped);
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Event receiver gone, discarding event");
            }
        }
    }

    /// Number of events dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Creates a bounded event channel.
pub fn event_channel<T: std::fmt::Debug>(capacity: usize) -> (EventSink<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSink {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let (sink, mut rx) = event_channel::<u32>(8);
        for i in 0..3 {
            sink.emit(i);
        }
        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_full_channel_drops_newest() {
        let (sink, mut rx) = event_channel::<u32>(2);
        sink.emit(1);
        sink.emit(2);
        sink.emit(3);

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_sink_discards() {
        let sink = EventSink::<u32>::disabled();
        sink.emit(7);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_closed_receiver_is_not_counted() {
        let (sink, rx) = event_channel::<u32>(1);
        drop(rx);
        sink.emit(1);
        assert_eq!(sink.dropped(), 0);
    }
}
