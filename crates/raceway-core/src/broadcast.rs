//! Fan-out of race events to every connected display.
//!
//! Publishing never blocks and never fails: with no subscribers the event
//! is simply dropped. Each subscriber has a bounded backlog; one that falls
//! further behind sees `RecvError::Lagged` and is expected to disconnect
//! and resync.

use raceway_types::RaceEvent;
use tokio::sync::broadcast;

/// Largest backlog a subscriber may have.
pub const MAX_CAPACITY: usize = 1 << 16;

/// Sender side of the event fan-out.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<RaceEvent>,
}

impl Broadcaster {
    /// Create a broadcaster whose subscribers may lag by `capacity` events,
    /// clamped to `1..=MAX_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.clamp(1, MAX_CAPACITY));
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: RaceEvent) -> usize {
        let kind = event.kind();
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::debug!(event = kind, receivers, "Broadcast");
        receivers
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RaceEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    #[test]
    fn oversized_capacity_is_clamped() {
        let broadcaster = Broadcaster::new(usize::MAX);
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.publish(RaceEvent::SessionCleared), 1);
        assert_eq!(rx.try_recv().ok(), Some(RaceEvent::SessionCleared));
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let broadcaster = Broadcaster::new(4);
        assert_eq!(broadcaster.publish(RaceEvent::SessionCleared), 0);
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let broadcaster = Broadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(RaceEvent::tick(2));
        broadcaster.publish(RaceEvent::tick(1));
        assert_eq!(rx.try_recv().ok(), Some(RaceEvent::tick(2)));
        assert_eq!(rx.try_recv().ok(), Some(RaceEvent::tick(1)));
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let broadcaster = Broadcaster::new(2);
        let mut rx = broadcaster.subscribe();
        for n in 0..5 {
            broadcaster.publish(RaceEvent::tick(n));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
    }
}
