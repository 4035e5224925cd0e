//! Ordered event fan-out
//!
//! A single dispatch queue feeds every subscriber: each event is delivered to
//! all current subscribers, in registration order, before the next event is
//! processed. Bounded per-subscriber channels mean a slow subscriber delays
//! the others rather than losing events.

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use xbeelink_core::GatewayEvent;

// ----------------------------------------------------------------------------
// Event Bus
// ----------------------------------------------------------------------------

pub(crate) struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<GatewayEvent>>>,
    buffer_size: usize,
}

impl EventBus {
    /// Create a bus whose subscribers each get a buffer of `buffer_size`
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer_size,
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> mpsc::Receiver<GatewayEvent> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Deliver one event to every live subscriber
    ///
    /// Suspends until every subscriber has buffer room; subscribers whose
    /// receiver is gone are pruned.
    pub async fn dispatch(&self, event: GatewayEvent) {
        let mut subscribers = self.subscribers.lock().await;
        let mut gone = Vec::new();
        for (index, subscriber) in subscribers.iter().enumerate() {
            if subscriber.send(event.clone()).await.is_err() {
                gone.push(index);
            }
        }
        for index in gone.into_iter().rev() {
            subscribers.remove(index);
            debug!("pruned dropped event subscriber");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_event_in_order() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe().await;
        let mut second = bus.subscribe().await;

        bus.dispatch(GatewayEvent::DiscoveryStopped).await;
        bus.dispatch(GatewayEvent::DiscoveryStopped).await;

        for rx in [&mut first, &mut second] {
            for _ in 0..2 {
                assert!(matches!(
                    rx.recv().await.unwrap(),
                    GatewayEvent::DiscoveryStopped
                ));
            }
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new(8);
        let first = bus.subscribe().await;
        let mut second = bus.subscribe().await;
        drop(first);

        bus.dispatch(GatewayEvent::DiscoveryStopped).await;
        assert!(matches!(
            second.recv().await.unwrap(),
            GatewayEvent::DiscoveryStopped
        ));
        assert_eq!(bus.subscribers.lock().await.len(), 1);
    }
}
