use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Domain events emitted by the cart and settlement services.
///
/// Shopper identities are carried as their string form so events serialize
/// cleanly for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        shopper: String,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        shopper: String,
        product_id: Uuid,
    },
    CartCleared {
        shopper: String,
    },

    // Settlement events
    CheckoutStarted {
        idempotency_key: String,
        shopper: String,
    },
    PaymentAuthorized {
        idempotency_key: String,
        provider_txn_id: String,
    },
    PaymentCaptured {
        idempotency_key: String,
        provider_txn_id: String,
    },
    SettlementFailed {
        idempotency_key: String,
        reason: String,
    },
    /// Capture succeeded but the order write did not. An operator must
    /// reconcile the captured payment against the missing order.
    ReconciliationRequired {
        idempotency_key: String,
        provider_txn_id: String,
    },

    // Order events
    OrderCreated(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget send. Event delivery is best-effort; a full or closed
    /// channel must never fail the request that produced the event.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("dropping domain event: {}", e);
        }
    }
}

/// Background consumer for the event channel. Today this logs; it is the seam
/// where webhook delivery or an outbox would attach.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::ReconciliationRequired {
                idempotency_key,
                provider_txn_id,
            } => {
                // Loud on purpose: money moved without a matching order.
                error!(
                    idempotency_key = %idempotency_key,
                    provider_txn_id = %provider_txn_id,
                    "captured payment has no persisted order; manual reconciliation required"
                );
            }
            _ => info!(event = ?event, "domain event"),
        }
    }
    info!("event channel closed; event processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic or error the caller.
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();
        sender.send(Event::OrderCreated(id)).await.unwrap();
        match rx.recv().await {
            Some(Event::OrderCreated(got)) => assert_eq!(got, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
