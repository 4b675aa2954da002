/*!
 * # In-memory collaborators
 *
 * A single `InMemoryBackend` implements every gateway trait on top of
 * `DashMap`s. It enforces the same rules the remote services do (unit
 * ownership, lifecycle transitions) so the engine can be exercised end to
 * end without a network. Faults can be queued per operation to simulate
 * rate limiting and flaky connections.
 */

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use super::{
    AssignmentOracle, CatalogGateway, CourierGateway, InventoryGateway, LabelGateway,
    OrderGateway, RefundGateway, ReturnGateway,
};
use crate::errors::{ErrorKind, ErrorResponse, ServiceError};
use crate::models::{
    Assignment, DispatchFailure, DispatchReport, NewOrder, NewRefund, NewReturn, NewVariant,
    Order, OrderItem, OrderStatus, PrintedLabel, Refund, RefundStatus, RefundTransition,
    ReturnRequest, ReturnStatus, ReturnTransition, Variant,
};

/// Backend view of one serialized unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub product_id: Uuid,
    pub consumed_by: Option<Uuid>,
    pub active: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    orders: DashMap<Uuid, Order>,
    returns: DashMap<Uuid, ReturnRequest>,
    refunds: DashMap<Uuid, Refund>,
    units: DashMap<String, UnitRecord>,
    stock: DashMap<Uuid, u64>,
    variants: DashMap<Uuid, Variant>,
    labels: DashMap<Uuid, PrintedLabel>,
    dispatch_rejections: DashMap<Uuid, ErrorResponse>,
    faults: DashMap<String, VecDeque<ErrorResponse>>,
    assign_calls: AtomicUsize,
    order_seq: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn register_unit(&self, code: impl Into<String>, product_id: Uuid) {
        self.units.insert(
            code.into(),
            UnitRecord {
                product_id,
                consumed_by: None,
                active: true,
            },
        );
    }

    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.get(&order_id).map(|entry| entry.clone())
    }

    pub fn unit(&self, code: &str) -> Option<UnitRecord> {
        self.units.get(code).map(|entry| entry.clone())
    }

    /// Free stock of a batch, or of a product for untracked lines.
    pub fn stock_level(&self, key: Uuid) -> u64 {
        self.stock.get(&key).map(|entry| *entry).unwrap_or(0)
    }

    pub fn assign_calls(&self) -> usize {
        self.assign_calls.load(Ordering::SeqCst)
    }

    pub fn printed_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    /// Queues `times` failures of the given kind for the named operation.
    pub fn fail_next(&self, operation: &str, kind: ErrorKind, message: &str, times: usize) {
        let mut queue = self.faults.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(ErrorResponse {
                kind,
                message: message.to_string(),
            });
        }
    }

    /// Makes the courier refuse one specific order in every dispatch.
    pub fn reject_dispatch(&self, order_id: Uuid, kind: ErrorKind, message: &str) {
        self.dispatch_rejections.insert(
            order_id,
            ErrorResponse {
                kind,
                message: message.to_string(),
            },
        );
    }

    fn take_fault(&self, operation: &str) -> Result<(), ServiceError> {
        let fault = self
            .faults
            .get_mut(operation)
            .and_then(|mut queue| queue.pop_front());
        match fault {
            Some(response) => {
                debug!(operation, kind = %response.kind, "injected fault");
                Err(response.into())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AssignmentOracle for InMemoryBackend {
    async fn try_assign(
        &self,
        order_id: Uuid,
        order_item_id: Uuid,
        code: &str,
    ) -> Result<Assignment, ServiceError> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        self.take_fault("try_assign")?;

        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let item = order.item_mut(order_item_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Order item {} not found", order_item_id))
        })?;
        let mut unit = self
            .units
            .get_mut(code)
            .ok_or_else(|| ServiceError::NotFound(format!("Unit code {} not found", code)))?;

        if unit.product_id != item.product_id {
            return Err(ServiceError::Mismatch(format!(
                "Unit {} does not belong to {}",
                code, item.product_name
            )));
        }
        if !unit.active || unit.consumed_by.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Unit {} is already consumed",
                code
            )));
        }
        if item.consumed_unit.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Order item {} already has a consumed unit",
                order_item_id
            )));
        }

        unit.consumed_by = Some(order_item_id);
        unit.active = false;
        item.consumed_unit = Some(code.to_string());
        let order_item = item.clone();
        order.updated_at = Utc::now();

        Ok(Assignment {
            order_item,
            consumed_unit: code.to_string(),
        })
    }
}

#[async_trait]
impl OrderGateway for InMemoryBackend {
    async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.take_fault("get_order")?;
        self.order(order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn mark_ready_for_shipment(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.take_fault("mark_ready_for_shipment")?;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.items.iter().any(|item| !item.is_resolved()) {
            return Err(ServiceError::InvalidState(format!(
                "Order {} still has unfulfilled items",
                order.order_number
            )));
        }
        order.status = OrderStatus::ReadyForShipment;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn create_order(&self, new_order: NewOrder) -> Result<Order, ServiceError> {
        self.take_fault("create_order")?;
        new_order.validate()?;

        let id = Uuid::new_v4();
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let items = new_order
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                batch_id: item.batch_id,
                known_units: Vec::new(),
                consumed_unit: None,
            })
            .collect();
        let order = Order {
            id,
            order_number: format!("ORD-N{:05}", seq),
            status: OrderStatus::Pending,
            items,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn complete_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.take_fault("complete_order")?;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is cancelled",
                order.order_number
            )));
        }
        order.status = OrderStatus::Completed;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[async_trait]
impl ReturnGateway for InMemoryBackend {
    async fn create_return(&self, payload: NewReturn) -> Result<ReturnRequest, ServiceError> {
        self.take_fault("create_return")?;
        if !self.orders.contains_key(&payload.order_id) {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                payload.order_id
            )));
        }

        let now = Utc::now();
        let request = ReturnRequest {
            id: Uuid::new_v4(),
            order_id: payload.order_id,
            reason: payload.reason,
            return_type: payload.return_type,
            status: ReturnStatus::Pending,
            items: payload.items,
            quality_check: None,
            total_refund_amount: payload.total_refund_amount,
            fee: rust_decimal::Decimal::ZERO,
            rejection_reason: None,
            inventory_restored: false,
            created_at: now,
            updated_at: now,
        };
        self.returns.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_return(&self, return_id: Uuid) -> Result<ReturnRequest, ServiceError> {
        self.take_fault("get_return")?;
        self.returns
            .get(&return_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))
    }

    async fn list_returns_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ReturnRequest>, ServiceError> {
        self.take_fault("list_returns_for_order")?;
        let mut returns: Vec<ReturnRequest> = self
            .returns
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .map(|entry| entry.clone())
            .collect();
        returns.sort_by_key(|r| r.created_at);
        Ok(returns)
    }

    async fn update_return(
        &self,
        return_id: Uuid,
        transition: ReturnTransition,
    ) -> Result<ReturnRequest, ServiceError> {
        self.take_fault("update_return")?;
        let mut request = self
            .returns
            .get_mut(&return_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;

        let target = transition.target_status(request.status);
        let allowed = match &transition {
            ReturnTransition::RecordQualityCheck(_) => request.status == ReturnStatus::Pending,
            ReturnTransition::RecordRestored { item_index } => {
                request.status == ReturnStatus::Approved && *item_index < request.items.len()
            }
            _ => request.status.can_transition_to(target),
        };
        if !allowed {
            return Err(ServiceError::invalid_transition(
                "return",
                request.status,
                target.as_str(),
            ));
        }

        match transition {
            ReturnTransition::RecordQualityCheck(check) => request.quality_check = Some(check),
            ReturnTransition::Approve { refund_amount, fee } => {
                request.total_refund_amount = refund_amount;
                request.fee = fee;
            }
            ReturnTransition::Reject { reason } => request.rejection_reason = Some(reason),
            ReturnTransition::RecordRestored { item_index } => {
                request.items[item_index].restored = true;
            }
            ReturnTransition::Process { restore_inventory } => {
                request.inventory_restored = restore_inventory;
            }
            ReturnTransition::Complete => {}
        }
        request.status = target;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }
}

#[async_trait]
impl RefundGateway for InMemoryBackend {
    async fn create_refund(&self, payload: NewRefund) -> Result<Refund, ServiceError> {
        self.take_fault("create_refund")?;
        if !self.returns.contains_key(&payload.return_id) {
            return Err(ServiceError::NotFound(format!(
                "Return {} not found",
                payload.return_id
            )));
        }
        let now = Utc::now();
        let refund = Refund {
            id: Uuid::new_v4(),
            return_id: payload.return_id,
            refund_type: payload.refund_type,
            method: payload.method,
            original_amount: payload.original_amount,
            fee: payload.fee,
            amount: payload.amount,
            status: RefundStatus::Pending,
            transaction_refs: Vec::new(),
            notes: payload.notes,
            failure_reason: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.refunds.insert(refund.id, refund.clone());
        Ok(refund)
    }

    async fn get_refund(&self, refund_id: Uuid) -> Result<Refund, ServiceError> {
        self.take_fault("get_refund")?;
        self.refunds
            .get(&refund_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Refund {} not found", refund_id)))
    }

    async fn list_refunds_for_return(
        &self,
        return_id: Uuid,
    ) -> Result<Vec<Refund>, ServiceError> {
        self.take_fault("list_refunds_for_return")?;
        Ok(self
            .refunds
            .iter()
            .filter(|entry| entry.return_id == return_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn update_refund(
        &self,
        refund_id: Uuid,
        transition: RefundTransition,
    ) -> Result<Refund, ServiceError> {
        self.take_fault("update_refund")?;
        let mut refund = self
            .refunds
            .get_mut(&refund_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Refund {} not found", refund_id)))?;

        let target = transition.target_status();
        if !refund.status.can_transition_to(target) {
            return Err(ServiceError::invalid_transition(
                "refund",
                refund.status,
                target.as_ref(),
            ));
        }
        match transition {
            RefundTransition::Process => {}
            RefundTransition::Complete { transaction_refs } => {
                refund.transaction_refs = transaction_refs
            }
            RefundTransition::Fail { reason } => refund.failure_reason = Some(reason),
            RefundTransition::Cancel { reason } => refund.cancellation_reason = Some(reason),
        }
        refund.status = target;
        refund.updated_at = Utc::now();
        Ok(refund.clone())
    }
}

#[async_trait]
impl InventoryGateway for InMemoryBackend {
    async fn reactivate_unit(&self, code: &str) -> Result<(), ServiceError> {
        self.take_fault("reactivate_unit")?;
        let mut unit = self
            .units
            .get_mut(code)
            .ok_or_else(|| ServiceError::NotFound(format!("Unit code {} not found", code)))?;
        unit.active = true;
        unit.consumed_by = None;
        Ok(())
    }

    async fn restock_batch(
        &self,
        product_id: Uuid,
        batch_id: Option<Uuid>,
        quantity: u32,
    ) -> Result<(), ServiceError> {
        self.take_fault("restock_batch")?;
        let key = batch_id.unwrap_or(product_id);
        *self.stock.entry(key).or_insert(0) += u64::from(quantity);
        Ok(())
    }
}

#[async_trait]
impl CourierGateway for InMemoryBackend {
    async fn bulk_dispatch(&self, order_ids: Vec<Uuid>) -> Result<DispatchReport, ServiceError> {
        self.take_fault("bulk_dispatch")?;
        let mut report = DispatchReport::default();
        for id in order_ids {
            if let Some(rejection) = self.dispatch_rejections.get(&id) {
                report.failed.push(DispatchFailure {
                    id,
                    error: rejection.clone(),
                });
                continue;
            }
            match self.orders.get_mut(&id) {
                Some(mut order) => {
                    order.status = OrderStatus::Shipped;
                    order.updated_at = Utc::now();
                    report.success.push(id);
                }
                None => report.failed.push(DispatchFailure {
                    id,
                    error: ErrorResponse {
                        kind: ErrorKind::NotFound,
                        message: format!("Order {} not found", id),
                    },
                }),
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl LabelGateway for InMemoryBackend {
    async fn print_label(&self, order_id: Uuid) -> Result<PrintedLabel, ServiceError> {
        self.take_fault("print_label")?;
        let order_number = self
            .orders
            .get(&order_id)
            .map(|order| order.order_number.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let label = PrintedLabel {
            order_id,
            label_ref: format!("LBL-{}", order_number),
        };
        self.labels.insert(order_id, label.clone());
        Ok(label)
    }
}

#[async_trait]
impl CatalogGateway for InMemoryBackend {
    async fn create_variant(&self, variant: NewVariant) -> Result<Variant, ServiceError> {
        self.take_fault("create_variant")?;
        variant.validate()?;
        let existing: HashSet<String> = self
            .variants
            .iter()
            .map(|entry| entry.sku.clone())
            .collect();
        if existing.contains(&variant.sku) {
            return Err(ServiceError::Conflict(format!(
                "SKU {} already exists",
                variant.sku
            )));
        }
        let created = Variant {
            id: Uuid::new_v4(),
            product_id: variant.product_id,
            sku: variant.sku,
            attributes: variant.attributes,
            price: variant.price,
        };
        self.variants.insert(created.id, created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn seeded() -> (InMemoryBackend, Order) {
        let backend = InMemoryBackend::new();
        let order_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();
        let order = Order {
            id: order_id,
            order_number: "ORD-1".into(),
            status: OrderStatus::Processing,
            items: vec![OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id,
                product_name: "Speaker".into(),
                quantity: 1,
                unit_price: dec!(99),
                batch_id: None,
                known_units: vec![],
                consumed_unit: None,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        backend.insert_order(order.clone());
        backend.register_unit("SPK-000001", product_id);
        backend.register_unit("OTHER-000001", Uuid::new_v4());
        (backend, order)
    }

    #[tokio::test]
    async fn assignment_binds_unit_once() {
        let (backend, order) = seeded();
        let item_id = order.items[0].id;

        let assignment = backend
            .try_assign(order.id, item_id, "SPK-000001")
            .await
            .unwrap();
        assert_eq!(assignment.consumed_unit, "SPK-000001");
        assert_eq!(backend.unit("SPK-000001").unwrap().consumed_by, Some(item_id));

        let again = backend.try_assign(order.id, item_id, "SPK-000001").await;
        assert_matches!(again, Err(ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn assignment_distinguishes_unknown_and_mismatched_codes() {
        let (backend, order) = seeded();
        let item_id = order.items[0].id;

        assert_matches!(
            backend.try_assign(order.id, item_id, "NOPE-000000").await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            backend.try_assign(order.id, item_id, "OTHER-000001").await,
            Err(ServiceError::Mismatch(_))
        );
        assert_eq!(backend.assign_calls(), 2);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let (backend, order) = seeded();
        backend.fail_next("get_order", ErrorKind::RateLimit, "slow down", 1);

        assert_matches!(
            backend.get_order(order.id).await,
            Err(ServiceError::RateLimitExceeded(_))
        );
        assert!(backend.get_order(order.id).await.is_ok());
    }

    #[tokio::test]
    async fn restock_without_batch_uses_product_stock() {
        let (backend, order) = seeded();
        let product_id = order.items[0].product_id;
        backend.restock_batch(product_id, None, 2).await.unwrap();
        backend.restock_batch(product_id, None, 1).await.unwrap();
        assert_eq!(backend.stock_level(product_id), 3);
    }
}
