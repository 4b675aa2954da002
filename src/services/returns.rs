use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::unit_mapper::{map_units, UnitMapping};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::{InventoryGateway, OrderGateway, ReturnGateway};
use crate::metrics;
use crate::models::{
    NewReturn, QualityCheck, ReturnRequest, ReturnStatus, ReturnTransition, ReturnType,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateReturnCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "A return reason is required"))]
    pub reason: String,
    pub return_type: ReturnType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ApproveReturnCommand {
    pub refund_amount_override: Option<Decimal>,
    pub fee: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordQualityCheckCommand {
    pub passed: bool,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Drives a return request through its lifecycle.
///
/// Every transition re-reads the return and checks its current state before
/// calling the remote service; an illegal transition is an `InvalidState`
/// error, never a no-op.
#[derive(Clone)]
pub struct ReturnService {
    returns: Arc<dyn ReturnGateway>,
    orders: Arc<dyn OrderGateway>,
    inventory: Arc<dyn InventoryGateway>,
    event_sender: Arc<EventSender>,
}

impl ReturnService {
    /// Creates a new return service instance
    pub fn new(
        returns: Arc<dyn ReturnGateway>,
        orders: Arc<dyn OrderGateway>,
        inventory: Arc<dyn InventoryGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            returns,
            orders,
            inventory,
            event_sender,
        }
    }

    /// Creates a pending return from a validated unit mapping.
    ///
    /// The mapping only nominates unit codes; they are mapped again against the
    /// stored order so line, price and batch always match it.
    #[instrument(skip(self, mapping), fields(order_id = %command.order_id))]
    pub async fn create(
        &self,
        command: CreateReturnCommand,
        mapping: &UnitMapping,
    ) -> Result<ReturnRequest, ServiceError> {
        command.validate()?;

        if mapping.order_id != command.order_id {
            return Err(ServiceError::ValidationError(
                "Unit mapping belongs to a different order".to_string(),
            ));
        }
        if !mapping.valid {
            return Err(ServiceError::ValidationError(format!(
                "Unit mapping has errors: {}",
                mapping.errors.join("; ")
            )));
        }
        let codes: Vec<String> = mapping
            .mapped_items
            .iter()
            .flat_map(|mapped| mapped.units.iter().map(|unit| unit.code().to_string()))
            .collect();
        if codes.is_empty() {
            return Err(ServiceError::ValidationError(
                "A return needs at least one item".to_string(),
            ));
        }

        let order = self.orders.get_order(command.order_id).await?;
        let active: Vec<ReturnRequest> = self
            .returns
            .list_returns_for_order(command.order_id)
            .await?
            .into_iter()
            .filter(|r| r.status != ReturnStatus::Rejected)
            .collect();

        let claimed: HashSet<String> = active
            .iter()
            .flat_map(|r| r.unit_codes().map(str::to_string))
            .collect();
        if let Some(code) = codes.iter().find(|code| claimed.contains(code.as_str())) {
            return Err(ServiceError::Conflict(format!(
                "Unit {} is already part of another return",
                code
            )));
        }

        // Items, prices and batches come from the stored order, never from the caller.
        let verified = map_units(&order, &claimed, &codes, &[]);
        if !verified.valid {
            error!(errors = ?verified.errors, "Unit mapping does not match the order");
            return Err(ServiceError::ValidationError(format!(
                "Unit mapping does not match order {}: {}",
                order.order_number,
                verified.errors.join("; ")
            )));
        }

        for mapped in &verified.mapped_items {
            let ordered = order
                .item(mapped.order_item_id)
                .map(|item| item.quantity)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Order item {} not found",
                        mapped.order_item_id
                    ))
                })?;
            let already: u32 = active
                .iter()
                .map(|r| r.returned_quantity(mapped.order_item_id))
                .sum();
            if already + mapped.quantity() > ordered {
                return Err(ServiceError::Conflict(format!(
                    "Returning {} more of {} would exceed the ordered quantity {} ({} already returned)",
                    mapped.quantity(),
                    mapped.product_name,
                    ordered,
                    already
                )));
            }
        }

        let items = verified.to_return_items();
        let total_refund_amount = items.iter().map(|item| item.line_total()).sum();
        let created = self
            .returns
            .create_return(NewReturn {
                order_id: command.order_id,
                reason: command.reason,
                return_type: command.return_type,
                items,
                total_refund_amount,
            })
            .await
            .map_err(|e| {
                error!("Failed to create return for order {}: {}", command.order_id, e);
                e
            })?;

        metrics::record_return_transition("create");
        info!(return_id = %created.id, total = %created.total_refund_amount, "Return created");
        self.event_sender
            .send_or_log(Event::ReturnCreated(created.id))
            .await;
        Ok(created)
    }

    pub async fn get_return(&self, return_id: Uuid) -> Result<ReturnRequest, ServiceError> {
        self.returns.get_return(return_id).await
    }

    /// Attaches a quality-check outcome. Only pending returns can be inspected.
    #[instrument(skip(self, command), fields(return_id = %return_id))]
    pub async fn record_quality_check(
        &self,
        return_id: Uuid,
        command: RecordQualityCheckCommand,
    ) -> Result<ReturnRequest, ServiceError> {
        command.validate()?;
        let current = self.returns.get_return(return_id).await?;
        if current.status != ReturnStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "Quality check can only be recorded on a pending return, return {} is {}",
                return_id, current.status
            )));
        }

        let updated = self
            .returns
            .update_return(
                return_id,
                ReturnTransition::RecordQualityCheck(QualityCheck {
                    passed: command.passed,
                    notes: command.notes,
                    checked_at: Utc::now(),
                }),
            )
            .await?;

        metrics::record_return_transition("quality_check");
        info!(passed = command.passed, "Quality check recorded");
        self.event_sender
            .send_or_log(Event::ReturnQualityChecked {
                return_id,
                passed: command.passed,
            })
            .await;
        Ok(updated)
    }

    #[instrument(skip(self, command), fields(return_id = %return_id))]
    pub async fn approve(
        &self,
        return_id: Uuid,
        command: ApproveReturnCommand,
    ) -> Result<ReturnRequest, ServiceError> {
        let current = self.load_for(return_id, ReturnStatus::Approved).await?;
        if !current.has_passing_quality_check() {
            return Err(ServiceError::InvalidState(format!(
                "Return {} has no passing quality check",
                return_id
            )));
        }

        let refund_amount = command
            .refund_amount_override
            .unwrap_or(current.total_refund_amount);
        let fee = command.fee.unwrap_or(Decimal::ZERO);
        if refund_amount < Decimal::ZERO || fee < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Refund amount and fee must not be negative".to_string(),
            ));
        }
        if fee > refund_amount {
            return Err(ServiceError::ValidationError(format!(
                "Fee {} exceeds refund amount {}",
                fee, refund_amount
            )));
        }

        let updated = self
            .returns
            .update_return(return_id, ReturnTransition::Approve { refund_amount, fee })
            .await?;

        metrics::record_return_transition("approve");
        info!(refund_amount = %refund_amount, fee = %fee, "Return approved");
        self.event_sender
            .send_or_log(Event::ReturnApproved {
                return_id,
                refund_amount,
            })
            .await;
        Ok(updated)
    }

    #[instrument(skip(self, reason), fields(return_id = %return_id))]
    pub async fn reject(
        &self,
        return_id: Uuid,
        reason: String,
    ) -> Result<ReturnRequest, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A rejection reason is required".to_string(),
            ));
        }
        self.load_for(return_id, ReturnStatus::Rejected).await?;

        let updated = self
            .returns
            .update_return(
                return_id,
                ReturnTransition::Reject {
                    reason: reason.clone(),
                },
            )
            .await?;

        metrics::record_return_transition("reject");
        info!(reason = %reason, "Return rejected");
        self.event_sender
            .send_or_log(Event::ReturnRejected { return_id, reason })
            .await;
        Ok(updated)
    }

    /// Moves an approved return to processed, optionally putting the goods back on sale.
    ///
    /// Items with a real unit code reactivate that exact unit; the others
    /// restock their batch by the returned quantity. Inventory is restored
    /// before the transition is recorded, and each restored item is marked on
    /// the return so a retry after a partial failure restores it only once.
    #[instrument(skip(self), fields(return_id = %return_id))]
    pub async fn process(
        &self,
        return_id: Uuid,
        restore_inventory: bool,
    ) -> Result<ReturnRequest, ServiceError> {
        let current = self.load_for(return_id, ReturnStatus::Processed).await?;

        if restore_inventory {
            for (item_index, item) in current.unrestored_items() {
                match item.unit_code.as_deref() {
                    Some(code) => {
                        self.inventory.reactivate_unit(code).await?;
                        info!(unit_code = code, "Unit reactivated");
                        self.event_sender
                            .send_or_log(Event::UnitReactivated {
                                return_id,
                                unit_code: code.to_string(),
                            })
                            .await;
                    }
                    None => {
                        self.inventory
                            .restock_batch(item.product_id, item.batch_id, item.quantity)
                            .await?;
                        info!(
                            product_id = %item.product_id,
                            quantity = item.quantity,
                            "Batch restocked"
                        );
                        self.event_sender
                            .send_or_log(Event::BatchRestocked {
                                return_id,
                                product_id: item.product_id,
                                batch_id: item.batch_id,
                                quantity: item.quantity,
                            })
                            .await;
                    }
                }
                // A retried process skips items already marked here.
                self.returns
                    .update_return(return_id, ReturnTransition::RecordRestored { item_index })
                    .await?;
            }
        }

        let updated = self
            .returns
            .update_return(return_id, ReturnTransition::Process { restore_inventory })
            .await?;

        metrics::record_return_transition("process");
        info!(restore_inventory, "Return processed");
        self.event_sender
            .send_or_log(Event::ReturnProcessed(return_id))
            .await;
        Ok(updated)
    }

    #[instrument(skip(self), fields(return_id = %return_id))]
    pub async fn complete(&self, return_id: Uuid) -> Result<ReturnRequest, ServiceError> {
        self.load_for(return_id, ReturnStatus::Completed).await?;

        let updated = self
            .returns
            .update_return(return_id, ReturnTransition::Complete)
            .await?;

        metrics::record_return_transition("complete");
        info!("Return completed");
        self.event_sender
            .send_or_log(Event::ReturnCompleted {
                return_id,
                timestamp: Utc::now(),
            })
            .await;
        Ok(updated)
    }

    async fn load_for(
        &self,
        return_id: Uuid,
        target: ReturnStatus,
    ) -> Result<ReturnRequest, ServiceError> {
        let current = self.returns.get_return(return_id).await?;
        if !current.status.can_transition_to(target) {
            error!(
                "Invalid return transition from {} to {} for {}",
                current.status, target, return_id
            );
            return Err(ServiceError::invalid_transition(
                "return",
                current.status,
                target.as_str(),
            ));
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::gateways::{MockInventoryGateway, MockOrderGateway, MockReturnGateway};
    use crate::models::ReturnItem;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn stored_return(status: ReturnStatus, items: Vec<ReturnItem>) -> ReturnRequest {
        ReturnRequest {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            reason: "damaged".into(),
            return_type: ReturnType::Refund,
            status,
            items,
            quality_check: None,
            total_refund_amount: dec!(40),
            fee: Decimal::ZERO,
            rejection_reason: None,
            inventory_restored: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(
        returns: MockReturnGateway,
        inventory: MockInventoryGateway,
    ) -> ReturnService {
        let (sender, _rx) = events::channel(16);
        ReturnService::new(
            Arc::new(returns),
            Arc::new(MockOrderGateway::new()),
            Arc::new(inventory),
            Arc::new(sender),
        )
    }

    #[tokio::test]
    async fn approve_requires_passing_quality_check() {
        let stored = stored_return(ReturnStatus::Pending, vec![]);
        let id = stored.id;
        let mut returns = MockReturnGateway::new();
        returns
            .expect_get_return()
            .returning(move |_| Ok(stored.clone()));
        returns.expect_update_return().never();

        let svc = service(returns, MockInventoryGateway::new());
        assert_matches!(
            svc.approve(id, ApproveReturnCommand::default()).await,
            Err(ServiceError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn completing_a_pending_return_is_rejected() {
        let stored = stored_return(ReturnStatus::Pending, vec![]);
        let id = stored.id;
        let mut returns = MockReturnGateway::new();
        returns
            .expect_get_return()
            .returning(move |_| Ok(stored.clone()));
        returns.expect_update_return().never();

        let svc = service(returns, MockInventoryGateway::new());
        assert_matches!(svc.complete(id).await, Err(ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn process_reactivates_serials_and_restocks_the_rest() {
        let product_id = Uuid::new_v4();
        let batch_id = Uuid::new_v4();
        let items = vec![
            ReturnItem {
                order_item_id: Uuid::new_v4(),
                product_id,
                batch_id: Some(batch_id),
                quantity: 1,
                unit_code: Some("SN-777777".into()),
                unit_price: dec!(20),
                restored: false,
            },
            ReturnItem {
                order_item_id: Uuid::new_v4(),
                product_id,
                batch_id: Some(batch_id),
                quantity: 1,
                unit_code: None,
                unit_price: dec!(20),
                restored: false,
            },
        ];
        let stored = stored_return(ReturnStatus::Approved, items);
        let id = stored.id;
        let processed = ReturnRequest {
            status: ReturnStatus::Processed,
            ..stored.clone()
        };
        let marked = stored.clone();

        let mut returns = MockReturnGateway::new();
        returns
            .expect_get_return()
            .returning(move |_| Ok(stored.clone()));
        returns
            .expect_update_return()
            .withf(|_, t| matches!(t, ReturnTransition::RecordRestored { .. }))
            .times(2)
            .returning(move |_, _| Ok(marked.clone()));
        returns
            .expect_update_return()
            .withf(|_, t| *t == ReturnTransition::Process { restore_inventory: true })
            .times(1)
            .returning(move |_, _| Ok(processed.clone()));

        let mut inventory = MockInventoryGateway::new();
        inventory
            .expect_reactivate_unit()
            .with(mockall::predicate::eq("SN-777777"))
            .times(1)
            .returning(|_| Ok(()));
        inventory
            .expect_restock_batch()
            .withf(move |p, b, q| *p == product_id && *b == Some(batch_id) && *q == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(returns, inventory);
        let result = svc.process(id, true).await.unwrap();
        assert_eq!(result.status, ReturnStatus::Processed);
    }

    #[tokio::test]
    async fn process_skips_items_restored_by_an_earlier_attempt() {
        let product_id = Uuid::new_v4();
        let items = vec![
            ReturnItem {
                order_item_id: Uuid::new_v4(),
                product_id,
                batch_id: None,
                quantity: 1,
                unit_code: None,
                unit_price: dec!(20),
                restored: true,
            },
            ReturnItem {
                order_item_id: Uuid::new_v4(),
                product_id,
                batch_id: None,
                quantity: 1,
                unit_code: Some("SN-888888".into()),
                unit_price: dec!(20),
                restored: false,
            },
        ];
        let stored = stored_return(ReturnStatus::Approved, items);
        let id = stored.id;
        let marked = stored.clone();
        let processed = ReturnRequest {
            status: ReturnStatus::Processed,
            ..stored.clone()
        };

        let mut returns = MockReturnGateway::new();
        returns
            .expect_get_return()
            .returning(move |_| Ok(stored.clone()));
        returns
            .expect_update_return()
            .withf(|_, t| *t == ReturnTransition::RecordRestored { item_index: 1 })
            .times(1)
            .returning(move |_, _| Ok(marked.clone()));
        returns
            .expect_update_return()
            .withf(|_, t| *t == ReturnTransition::Process { restore_inventory: true })
            .times(1)
            .returning(move |_, _| Ok(processed.clone()));

        let mut inventory = MockInventoryGateway::new();
        inventory.expect_restock_batch().never();
        inventory
            .expect_reactivate_unit()
            .with(mockall::predicate::eq("SN-888888"))
            .times(1)
            .returning(|_| Ok(()));

        let svc = service(returns, inventory);
        assert_eq!(
            svc.process(id, true).await.unwrap().status,
            ReturnStatus::Processed
        );
    }

    #[tokio::test]
    async fn reject_needs_a_reason() {
        let svc = service(MockReturnGateway::new(), MockInventoryGateway::new());
        assert_matches!(
            svc.reject(Uuid::new_v4(), "  ".into()).await,
            Err(ServiceError::ValidationError(_))
        );
    }
}
