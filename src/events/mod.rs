use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

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

    /// Sends an event after the remote transition already happened.
    /// A closed channel is logged and otherwise ignored.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

// Observable transitions of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Fulfillment events
    UnitScanned {
        order_id: Uuid,
        order_item_id: Uuid,
        unit_code: String,
    },
    OrderReadyForShipment(Uuid),

    // Return events
    ReturnCreated(Uuid),
    ReturnQualityChecked {
        return_id: Uuid,
        passed: bool,
    },
    ReturnApproved {
        return_id: Uuid,
        refund_amount: Decimal,
    },
    ReturnRejected {
        return_id: Uuid,
        reason: String,
    },
    ReturnProcessed(Uuid),
    ReturnCompleted {
        return_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    // Inventory events
    UnitReactivated {
        return_id: Uuid,
        unit_code: String,
    },
    BatchRestocked {
        return_id: Uuid,
        product_id: Uuid,
        batch_id: Option<Uuid>,
        quantity: u32,
    },

    // Refund events
    RefundCreated {
        refund_id: Uuid,
        return_id: Uuid,
        amount: Decimal,
    },
    RefundProcessing(Uuid),
    RefundCompleted {
        refund_id: Uuid,
        amount: Decimal,
    },
    RefundFailed {
        refund_id: Uuid,
        reason: String,
    },
    RefundCancelled {
        refund_id: Uuid,
        reason: String,
    },

    // Exchange events
    ExchangeCompleted {
        order_id: Uuid,
        return_id: Uuid,
        new_order_id: Uuid,
        net_settlement: Decimal,
    },
    ExchangeAborted {
        order_id: Uuid,
        failed_step: String,
        error: String,
    },

    // Bulk operation events
    BatchFinished {
        operation: String,
        total: usize,
        succeeded: usize,
        failed: usize,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UnitScanned { .. } => "unit_scanned",
            Event::OrderReadyForShipment(_) => "order_ready_for_shipment",
            Event::ReturnCreated(_) => "return_created",
            Event::ReturnQualityChecked { .. } => "return_quality_checked",
            Event::ReturnApproved { .. } => "return_approved",
            Event::ReturnRejected { .. } => "return_rejected",
            Event::ReturnProcessed(_) => "return_processed",
            Event::ReturnCompleted { .. } => "return_completed",
            Event::UnitReactivated { .. } => "unit_reactivated",
            Event::BatchRestocked { .. } => "batch_restocked",
            Event::RefundCreated { .. } => "refund_created",
            Event::RefundProcessing(_) => "refund_processing",
            Event::RefundCompleted { .. } => "refund_completed",
            Event::RefundFailed { .. } => "refund_failed",
            Event::RefundCancelled { .. } => "refund_cancelled",
            Event::ExchangeCompleted { .. } => "exchange_completed",
            Event::ExchangeAborted { .. } => "exchange_aborted",
            Event::BatchFinished { .. } => "batch_finished",
        }
    }
}

// Drains the event channel and logs every event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ExchangeAborted {
                order_id,
                failed_step,
                error,
            } => {
                warn!(
                    order_id = %order_id,
                    failed_step = %failed_step,
                    error = %error,
                    "Exchange aborted"
                );
            }
            Event::RefundFailed { refund_id, reason } => {
                warn!(refund_id = %refund_id, reason = %reason, "Refund failed");
            }
            other => {
                info!(event = other.name(), payload = ?other, "Received event");
            }
        }
    }

    info!("Event processing loop stopped");
}
