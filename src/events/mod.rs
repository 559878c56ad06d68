use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the order and payment lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderPaid {
        order_id: Uuid,
        provider_payment_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    OrderCancelled(Uuid),
    OrderDeleted(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Background consumer for lifecycle events. Downstream integrations
/// (fulfillment, notifications) hang off this loop; today it records the
/// event stream to the log.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    old_status = %old_status,
                    new_status = %new_status,
                    "event: order status changed"
                );
            }
            Event::OrderPaid {
                order_id,
                provider_payment_id,
            } => {
                info!(
                    order_id = %order_id,
                    provider_payment_id = %provider_payment_id,
                    "event: order paid"
                );
            }
            Event::PaymentFailed { order_id } => {
                info!(order_id = %order_id, "event: payment failed");
            }
            Event::OrderCancelled(order_id) => {
                info!(order_id = %order_id, "event: order cancelled");
            }
            Event::OrderDeleted(order_id) => {
                info!(order_id = %order_id, "event: order deleted");
            }
        }
    }
}
