//! Internal event broadcast — tokio::broadcast channel for cross-component events.

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::auction::Transition;

/// Service-wide events for notifications and logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    /// A state change of an hourly auction.
    Lifecycle {
        auction_id: i64,
        auction_code: String,
        transition: Transition,
    },
    /// A bid was accepted.
    BidPlaced {
        auction_id: i64,
        round_number: u32,
        player_id: String,
        amount: i64,
    },
    /// A new day and its hourly auctions were scheduled.
    DailyAuctionCreated {
        daily_code: String,
        auction_date: NaiveDate,
        auctions: usize,
    },
    /// The daily replica caught up with its masters.
    ReplicaSynced {
        daily_code: String,
        added: usize,
        refreshed: usize,
    },
    /// A gateway confirmed a payment.
    PaymentVerified {
        gateway_order_id: String,
        gateway: String,
        purpose: String,
        player_id: String,
        amount: i64,
    },
    /// A payment failed verification or could not be applied.
    PaymentFailed {
        gateway_order_id: String,
        gateway: String,
        reason: String,
    },
    /// A scheduler tick failed.
    SchedulerError {
        message: String,
    },
}

impl AuctionEvent {
    pub fn lifecycle(auction_id: i64, auction_code: &str, transition: Transition) -> Self {
        AuctionEvent::Lifecycle {
            auction_id,
            auction_code: auction_code.to_string(),
            transition,
        }
    }
}

/// Central event bus for broadcasting events to all subscribers.
pub struct EventBus {
    tx: broadcast::Sender<AuctionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AuctionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Publish every transition of one auction, in order.
    pub fn publish_transitions(&self, auction_id: i64, auction_code: &str, transitions: Vec<Transition>) {
        for t in transitions {
            self.publish(AuctionEvent::lifecycle(auction_id, auction_code, t));
        }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.tx.subscribe()
    }

    /// Get current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish_transitions(
            7,
            "HA20261017-1400",
            vec![
                Transition::AuctionStarted,
                Transition::AuctionCompleted { winner_ids: vec![] },
            ],
        );

        match rx.recv().await.unwrap() {
            AuctionEvent::Lifecycle { auction_id, transition, .. } => {
                assert_eq!(auction_id, 7);
                assert_eq!(transition, Transition::AuctionStarted);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            AuctionEvent::Lifecycle {
                transition: Transition::AuctionCompleted { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(AuctionEvent::SchedulerError {
            message: "boom".into(),
        });
    }

    #[test]
    fn test_event_json_shape() {
        let ev = AuctionEvent::lifecycle(
            3,
            "HA20261017-0900",
            Transition::RoundStarted {
                round_number: 2,
                ends_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            },
        );
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "lifecycle");
        assert_eq!(v["transition"]["kind"], "round_started");
        assert_eq!(v["transition"]["round_number"], 2);
    }
}
