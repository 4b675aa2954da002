/*!
 * # Fulfillment scanning
 *
 * A `FulfillmentSession` is the exclusively owned scanning state of one
 * order. `ScanResolver::submit_scan` takes it by `&mut`, so scans of one
 * order are totally ordered while sessions of different orders can run on
 * different tasks.
 *
 * The resolver has no product knowledge of its own: each unresolved line is
 * offered to the remote assignment oracle in list order until one accepts
 * the code. A mismatch moves on to the next line; any other refusal ends
 * the scan.
 */

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::{AssignmentOracle, OrderGateway};
use crate::metrics;
use crate::models::{Order, OrderItem, ScanHistoryEntry, ScanOutcome, ScanProgress};

/// Scanning state of one order.
#[derive(Debug, Clone)]
pub struct FulfillmentSession {
    order: Order,
    /// order item id -> consumed unit code
    consumed: HashMap<Uuid, String>,
    scanned: HashSet<String>,
    history: Vec<ScanHistoryEntry>,
    finalized: bool,
}

impl FulfillmentSession {
    /// Opens a session; lines that already carry a consumed unit count as scanned.
    pub fn open(order: Order) -> Self {
        let consumed: HashMap<Uuid, String> = order
            .items
            .iter()
            .filter_map(|item| item.consumed_unit.clone().map(|code| (item.id, code)))
            .collect();
        let scanned = consumed.values().cloned().collect();
        Self {
            order,
            consumed,
            scanned,
            history: Vec::new(),
            finalized: false,
        }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn order_id(&self) -> Uuid {
        self.order.id
    }

    /// True iff every line of the order has exactly one consumed unit.
    /// An order without lines is never complete.
    pub fn is_complete(&self) -> bool {
        !self.order.items.is_empty()
            && self
                .order
                .items
                .iter()
                .all(|item| self.consumed.contains_key(&item.id))
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn progress(&self) -> ScanProgress {
        ScanProgress {
            scanned: self.consumed.len(),
            total: self.order.items.len(),
        }
    }

    pub fn history(&self) -> &[ScanHistoryEntry] {
        &self.history
    }

    pub fn consumed_unit(&self, order_item_id: Uuid) -> Option<&str> {
        self.consumed.get(&order_item_id).map(String::as_str)
    }

    pub fn consumed_units(&self) -> impl Iterator<Item = (Uuid, &str)> {
        self.consumed.iter().map(|(id, code)| (*id, code.as_str()))
    }

    fn unresolved_items(&self) -> Vec<OrderItem> {
        self.order
            .items
            .iter()
            .filter(|item| !self.consumed.contains_key(&item.id))
            .cloned()
            .collect()
    }

    /// `scanned` is the raw code, `consumed` the unit code the oracle settled on.
    fn record_consumed(&mut self, item: &OrderItem, scanned: &str, consumed: &str) {
        self.consumed.insert(item.id, consumed.to_string());
        self.scanned.insert(scanned.to_string());
        self.scanned.insert(consumed.to_string());
        if let Some(line) = self.order.item_mut(item.id) {
            line.consumed_unit = Some(consumed.to_string());
        }
    }
}

pub struct ScanResolver {
    oracle: Arc<dyn AssignmentOracle>,
    orders: Arc<dyn OrderGateway>,
    event_sender: Arc<EventSender>,
    min_code_length: usize,
}

impl ScanResolver {
    pub fn new(
        oracle: Arc<dyn AssignmentOracle>,
        orders: Arc<dyn OrderGateway>,
        event_sender: Arc<EventSender>,
        min_code_length: usize,
    ) -> Self {
        Self {
            oracle,
            orders,
            event_sender,
            min_code_length,
        }
    }

    /// Loads the order and opens a session for it.
    pub async fn start_session(&self, order_id: Uuid) -> Result<FulfillmentSession, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        let session = FulfillmentSession::open(order);
        info!(
            order_id = %order_id,
            scanned = session.progress().scanned,
            total = session.progress().total,
            "Fulfillment session opened"
        );
        Ok(session)
    }

    /// Submits one scanned code. Always appends exactly one history entry.
    #[instrument(skip(self, session), fields(order_id = %session.order_id()))]
    pub async fn submit_scan(&self, session: &mut FulfillmentSession, code: &str) -> ScanOutcome {
        let code = code.trim();
        let outcome = self.resolve(session, code).await;

        metrics::record_scan(outcome.kind().as_ref());
        session.history.push(ScanHistoryEntry::record(code, &outcome));

        match &outcome {
            ScanOutcome::Success {
                order_item_id,
                product_name,
            } => {
                info!(code, order_item_id = %order_item_id, product = %product_name, "Unit scanned");
                self.event_sender
                    .send_or_log(Event::UnitScanned {
                        order_id: session.order_id(),
                        order_item_id: *order_item_id,
                        unit_code: code.to_string(),
                    })
                    .await;
            }
            other => {
                warn!(code, outcome = %other.kind(), message = %other.message(), "Scan not accepted");
            }
        }
        outcome
    }

    async fn resolve(&self, session: &mut FulfillmentSession, code: &str) -> ScanOutcome {
        if code.chars().count() < self.min_code_length {
            return ScanOutcome::Fatal {
                reason: "invalid format".to_string(),
            };
        }
        if session.finalized {
            return ScanOutcome::Fatal {
                reason: "order already finalized".to_string(),
            };
        }
        if session.scanned.contains(code) {
            return ScanOutcome::Duplicate;
        }
        if session.order.items.is_empty() {
            return ScanOutcome::Fatal {
                reason: "order has no items to scan".to_string(),
            };
        }

        let unresolved = session.unresolved_items();
        if unresolved.is_empty() {
            return ScanOutcome::NoMatch {
                reason: "order already complete".to_string(),
            };
        }

        for item in &unresolved {
            match self
                .oracle
                .try_assign(session.order_id(), item.id, code)
                .await
            {
                Ok(assignment) => {
                    session.record_consumed(item, code, &assignment.consumed_unit);
                    return ScanOutcome::Success {
                        order_item_id: item.id,
                        product_name: item.product_name.clone(),
                    };
                }
                Err(e) if e.is_mismatch() => continue,
                Err(e) => {
                    return ScanOutcome::Fatal {
                        reason: e.to_string(),
                    }
                }
            }
        }

        ScanOutcome::NoMatch {
            reason: "no remaining item accepts this code".to_string(),
        }
    }

    /// Moves a complete order to ready-for-shipment.
    #[instrument(skip(self, session), fields(order_id = %session.order_id()))]
    pub async fn finalize(&self, session: &mut FulfillmentSession) -> Result<Order, ServiceError> {
        if session.finalized {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is already finalized",
                session.order.order_number
            )));
        }
        if !session.is_complete() {
            let progress = session.progress();
            return Err(ServiceError::InvalidState(format!(
                "Order {} is not fully scanned ({}/{})",
                session.order.order_number, progress.scanned, progress.total
            )));
        }

        let order = self.orders.mark_ready_for_shipment(session.order_id()).await?;
        session.finalized = true;
        session.order.status = order.status;
        info!(order_number = %order.order_number, "Order ready for shipment");
        self.event_sender
            .send_or_log(Event::OrderReadyForShipment(order.id))
            .await;
        Ok(order)
    }
}
