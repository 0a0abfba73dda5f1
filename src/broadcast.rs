//! Market-delta fan-out to realtime subscribers
//!
//! The lifecycle service publishes a `MarketDelta` after every mutation.
//! Delivery is best-effort: a publish never fails the trade or resolution
//! that produced it.

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::MarketDelta;

/// Sink for market-delta events, injected into the lifecycle service
pub trait DeltaBroadcaster: Send + Sync {
    fn publish(&self, delta: MarketDelta);
}

/// Fan-out hub over a tokio broadcast channel.
///
/// Subscribers that fall behind lose the oldest deltas (broadcast-channel
/// lagging semantics); consumers needing every event should re-read market
/// state instead of relying on the stream as a journal.
pub struct BroadcastHub {
    sender: broadcast::Sender<MarketDelta>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketDelta> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl DeltaBroadcaster for BroadcastHub {
    fn publish(&self, delta: MarketDelta) {
        // Err means no live subscribers; that is not a failure.
        if self.sender.send(delta).is_err() {
            trace!("market delta dropped, no subscribers");
        }
    }
}

/// Discards every delta; for embedders running without realtime fan-out
pub struct NullBroadcaster;

impl DeltaBroadcaster for NullBroadcaster {
    fn publish(&self, _delta: MarketDelta) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn delta(sequence: u64) -> MarketDelta {
        MarketDelta {
            market_id: Uuid::new_v4(),
            yes_shares: 100.0,
            no_shares: 100.0,
            price_yes: 0.5,
            price_no: 0.5,
            status: MarketStatus::Open,
            timestamp: Utc::now(),
            sequence,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_deltas() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.publish(delta(1));
        hub.publish(delta(2));

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let hub = BroadcastHub::new(16);
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish(delta(1));

        NullBroadcaster.publish(delta(2));
    }
}
