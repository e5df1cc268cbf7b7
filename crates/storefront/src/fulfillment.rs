//! Fire-and-forget fulfillment dispatch.
//!
//! Once an order row exists, a fulfillment event goes onto a bounded
//! queue and a background worker delivers it to the configured webhook.
//! Nothing on this path can fail checkout: a full queue, a dead worker,
//! or a webhook error is logged and dropped.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use thistle_core::OrderId;

use crate::models::{CartItem, ShippingAddress};

/// Queue capacity; dispatch past this logs and drops.
const QUEUE_CAPACITY: usize = 128;

/// The event posted downstream to begin shipping processing.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentEvent {
    pub event_id: Uuid,
    pub order_id: OrderId,
    pub order_number: String,
    pub address: ShippingAddress,
    pub items: Vec<CartItem>,
}

impl FulfillmentEvent {
    /// Build an event for a freshly persisted order.
    #[must_use]
    pub fn new(
        order_id: OrderId,
        order_number: String,
        address: ShippingAddress,
        items: Vec<CartItem>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            order_id,
            order_number,
            address,
            items,
        }
    }
}

/// Handle for enqueueing fulfillment events.
///
/// Cheaply cloneable; all clones feed the same worker.
#[derive(Clone)]
pub struct FulfillmentDispatcher {
    tx: mpsc::Sender<FulfillmentEvent>,
}

impl FulfillmentDispatcher {
    /// Start the background worker and return the dispatch handle.
    ///
    /// With no webhook configured the worker still drains the queue,
    /// logging each event; ops can replay from logs if needed.
    #[must_use]
    pub fn start(webhook_url: Option<String>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(run_worker(rx, webhook_url));
        Self { tx }
    }

    /// Construct a dispatcher over an existing sender (tests).
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<FulfillmentEvent>) -> Self {
        Self { tx }
    }

    /// Enqueue an event without blocking.
    ///
    /// Infallible from the caller's perspective: a full queue or a
    /// shut-down worker is logged at error, never propagated.
    pub fn dispatch(&self, event: FulfillmentEvent) {
        let order_number = event.order_number.clone();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!(%order_number, "fulfillment queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!(%order_number, "fulfillment worker gone, event dropped");
            }
        }
    }
}

/// Drain the queue, posting each event to the webhook when configured.
async fn run_worker(mut rx: mpsc::Receiver<FulfillmentEvent>, webhook_url: Option<String>) {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_default();

    while let Some(event) = rx.recv().await {
        let Some(url) = webhook_url.as_deref() else {
            tracing::info!(
                order_number = %event.order_number,
                event_id = %event.event_id,
                "fulfillment event (no webhook configured)"
            );
            continue;
        };

        match client.post(url).json(&event).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    order_number = %event.order_number,
                    event_id = %event.event_id,
                    "fulfillment event delivered"
                );
            }
            Ok(response) => {
                tracing::warn!(
                    order_number = %event.order_number,
                    status = %response.status(),
                    "fulfillment webhook rejected event"
                );
            }
            Err(e) => {
                tracing::warn!(
                    order_number = %event.order_number,
                    error = %e,
                    "fulfillment webhook unreachable"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use thistle_core::Email;

    fn event(n: u32) -> FulfillmentEvent {
        FulfillmentEvent::new(
            OrderId::new(i32::try_from(n).unwrap()),
            format!("TL-{n:010}"),
            ShippingAddress {
                email: Email::parse("jane@example.com").unwrap(),
                street: "100 Main St".to_owned(),
                city: "Portland".to_owned(),
                state: "OR".to_owned(),
                zip: "97201".to_owned(),
            },
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_reaches_worker_queue() {
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = FulfillmentDispatcher::from_sender(tx);

        dispatcher.dispatch(event(1));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.order_number, "TL-0000000001");
    }

    #[tokio::test]
    async fn test_dispatch_on_full_queue_drops_without_panicking() {
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = FulfillmentDispatcher::from_sender(tx);

        dispatcher.dispatch(event(1));
        // Queue is full; this one is logged and dropped.
        dispatcher.dispatch(event(2));
    }

    #[tokio::test]
    async fn test_dispatch_after_worker_shutdown_is_swallowed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let dispatcher = FulfillmentDispatcher::from_sender(tx);

        dispatcher.dispatch(event(1));
    }

    #[test]
    fn test_event_serializes_consumed_fields() {
        let json = serde_json::to_value(event(7)).unwrap();
        assert_eq!(json["order_id"], 7);
        assert_eq!(json["order_number"], "TL-0000000007");
        assert!(json["event_id"].is_string());
        assert_eq!(json["address"]["city"], "Portland");
    }
}
