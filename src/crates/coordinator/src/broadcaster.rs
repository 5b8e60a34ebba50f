//! Bounded fan-out of lifecycle events to subscriber queues
//!
//! The actor posts flow/node begin, end, and error notifications; each
//! subscriber owns a bounded queue. Posting never blocks the actor: a full
//! queue costs that subscriber the event (its draining discipline is its own
//! responsibility), and a closed queue drops the subscriber.

use codeflow_core::FlowEvent;
use tokio::sync::mpsc;

/// Fan-out channel for [`FlowEvent`]s, owned by the coordinator actor
#[derive(Debug)]
pub struct FlowEventBroadcaster {
    capacity: usize,
    subscribers: Vec<mpsc::Sender<FlowEvent>>,
    dropped: u64,
}

impl FlowEventBroadcaster {
    /// Create a broadcaster whose subscriber queues hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Vec::new(),
            dropped: 0,
        }
    }

    /// Hand out a fresh subscription queue
    pub fn subscribe(&mut self) -> mpsc::Receiver<FlowEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.push(tx);
        rx
    }

    /// Post an event to every live subscriber without blocking
    pub fn post(&mut self, event: FlowEvent) {
        let mut dropped = self.dropped;
        self.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        if dropped != self.dropped {
            tracing::debug!(
                kind = ?event.kind,
                flow = %event.flow_id,
                "Lifecycle event dropped for slow subscriber(s)"
            );
            self.dropped = dropped;
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total events dropped on full subscriber queues so far
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeflow_core::FlowEventKind;
    use serde_json::json;
    use uuid::Uuid;

    fn event() -> FlowEvent {
        FlowEvent::new(FlowEventKind::NodeBegin, Uuid::new_v4(), json!({}), None, None)
    }

    #[tokio::test]
    async fn subscribers_each_get_their_own_queue() {
        let mut feb = FlowEventBroadcaster::new(4);
        let mut rx1 = feb.subscribe();
        let mut rx2 = feb.subscribe();

        feb.post(event());
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let mut feb = FlowEventBroadcaster::new(1);
        let mut rx = feb.subscribe();

        feb.post(event());
        feb.post(event()); // dropped, queue is full
        assert_eq!(feb.dropped_count(), 1);
        assert_eq!(feb.subscriber_count(), 1);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let mut feb = FlowEventBroadcaster::new(4);
        let rx = feb.subscribe();
        drop(rx);

        feb.post(event());
        assert_eq!(feb.subscriber_count(), 0);
    }
}
