/*!
 * # Exchange saga
 *
 * An exchange spans three independently owned systems: the return, the
 * refund and a brand-new order. Each finished step is appended to an
 * `ExchangeLedger`. On failure the saga stops and returns the ledger with
 * the error; completed steps are left in place for an operator to resume
 * or compensate. Nothing is rolled back automatically.
 */

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::refunds::{CreateRefundCommand, RefundService};
use super::returns::{
    ApproveReturnCommand, CreateReturnCommand, RecordQualityCheckCommand, ReturnService,
};
use super::unit_mapper::UnitMapping;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::OrderGateway;
use crate::metrics;
use crate::models::{NewOrder, Order, Refund, RefundMethod, RefundType, ReturnRequest, ReturnType};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExchangeStep {
    Validate,
    CreateReturn,
    QualityCheck,
    ApproveReturn,
    ProcessReturn,
    CompleteReturn,
    CreateRefund,
    ProcessRefund,
    CompleteRefund,
    CreateOrder,
    CompleteOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step: ExchangeStep,
    /// Id of the record the step created or advanced.
    pub reference_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

/// Completed steps of one exchange, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeLedger {
    pub entries: Vec<LedgerEntry>,
}

impl ExchangeLedger {
    fn record(&mut self, step: ExchangeStep, reference_id: Uuid) {
        self.entries.push(LedgerEntry {
            step,
            reference_id,
            completed_at: Utc::now(),
        });
    }

    pub fn completed(&self, step: ExchangeStep) -> bool {
        self.entries.iter().any(|entry| entry.step == step)
    }

    pub fn last_step(&self) -> Option<ExchangeStep> {
        self.entries.last().map(|entry| entry.step)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Exchange aborted at {failed_step}: {source}")]
pub struct ExchangeError {
    pub failed_step: ExchangeStep,
    pub ledger: ExchangeLedger,
    #[source]
    pub source: ServiceError,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExchangeCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub mapping: UnitMapping,
    #[validate]
    pub replacement: NewOrder,
    pub refund_method: RefundMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOutcome {
    pub return_request: ReturnRequest,
    pub refund: Refund,
    pub new_order: Order,
    /// Positive: owed to the customer. Negative: the customer owes the difference.
    pub net_settlement: Decimal,
    pub ledger: ExchangeLedger,
}

pub struct ExchangeCoordinator {
    returns: Arc<ReturnService>,
    refunds: Arc<RefundService>,
    orders: Arc<dyn OrderGateway>,
    event_sender: Arc<EventSender>,
}

impl ExchangeCoordinator {
    pub fn new(
        returns: Arc<ReturnService>,
        refunds: Arc<RefundService>,
        orders: Arc<dyn OrderGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            returns,
            refunds,
            orders,
            event_sender,
        }
    }

    #[instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn execute(&self, command: ExchangeCommand) -> Result<ExchangeOutcome, ExchangeError> {
        let order_id = command.order_id;
        let mut ledger = ExchangeLedger::default();

        match self.run_steps(command, &mut ledger).await {
            Ok((return_request, refund, new_order)) => {
                let net_settlement = refund.amount - new_order.total();
                metrics::EXCHANGES_COMPLETED.inc();
                info!(
                    return_id = %return_request.id,
                    new_order_id = %new_order.id,
                    net_settlement = %net_settlement,
                    "Exchange completed"
                );
                self.event_sender
                    .send_or_log(Event::ExchangeCompleted {
                        order_id,
                        return_id: return_request.id,
                        new_order_id: new_order.id,
                        net_settlement,
                    })
                    .await;
                Ok(ExchangeOutcome {
                    return_request,
                    refund,
                    new_order,
                    net_settlement,
                    ledger,
                })
            }
            Err((failed_step, source)) => {
                metrics::EXCHANGES_ABORTED.inc();
                error!(
                    failed_step = %failed_step,
                    completed_steps = ledger.entries.len(),
                    error = %source,
                    "Exchange aborted"
                );
                self.event_sender
                    .send_or_log(Event::ExchangeAborted {
                        order_id,
                        failed_step: failed_step.to_string(),
                        error: source.to_string(),
                    })
                    .await;
                Err(ExchangeError {
                    failed_step,
                    ledger,
                    source,
                })
            }
        }
    }

    async fn run_steps(
        &self,
        command: ExchangeCommand,
        ledger: &mut ExchangeLedger,
    ) -> Result<(ReturnRequest, Refund, Order), (ExchangeStep, ServiceError)> {
        command
            .validate()
            .map_err(|e| (ExchangeStep::Validate, ServiceError::from(e)))?;
        let ExchangeCommand {
            order_id,
            reason,
            mapping,
            mut replacement,
            refund_method,
        } = command;

        let created = self
            .returns
            .create(
                CreateReturnCommand {
                    order_id,
                    reason,
                    return_type: ReturnType::Exchange,
                },
                &mapping,
            )
            .await
            .map_err(|e| (ExchangeStep::CreateReturn, e))?;
        let return_id = created.id;
        ledger.record(ExchangeStep::CreateReturn, return_id);

        self.returns
            .record_quality_check(
                return_id,
                RecordQualityCheckCommand {
                    passed: true,
                    notes: Some("Automatic pass for exchange".to_string()),
                },
            )
            .await
            .map_err(|e| (ExchangeStep::QualityCheck, e))?;
        ledger.record(ExchangeStep::QualityCheck, return_id);

        self.returns
            .approve(return_id, ApproveReturnCommand::default())
            .await
            .map_err(|e| (ExchangeStep::ApproveReturn, e))?;
        ledger.record(ExchangeStep::ApproveReturn, return_id);

        self.returns
            .process(return_id, true)
            .await
            .map_err(|e| (ExchangeStep::ProcessReturn, e))?;
        ledger.record(ExchangeStep::ProcessReturn, return_id);

        let return_request = self
            .returns
            .complete(return_id)
            .await
            .map_err(|e| (ExchangeStep::CompleteReturn, e))?;
        ledger.record(ExchangeStep::CompleteReturn, return_id);

        let refund = self
            .refunds
            .create(CreateRefundCommand {
                return_id,
                refund_type: RefundType::Full,
                method: refund_method,
                fee: None,
                notes: Some("Exchange settlement".to_string()),
            })
            .await
            .map_err(|e| (ExchangeStep::CreateRefund, e))?;
        ledger.record(ExchangeStep::CreateRefund, refund.id);

        self.refunds
            .process(refund.id)
            .await
            .map_err(|e| (ExchangeStep::ProcessRefund, e))?;
        ledger.record(ExchangeStep::ProcessRefund, refund.id);

        let refund = self
            .refunds
            .complete(refund.id, vec![format!("EXCHANGE-{}", return_id.simple())])
            .await
            .map_err(|e| (ExchangeStep::CompleteRefund, e))?;
        ledger.record(ExchangeStep::CompleteRefund, refund.id);

        replacement.source_order_id = Some(order_id);
        let new_order = self
            .orders
            .create_order(replacement)
            .await
            .map_err(|e| (ExchangeStep::CreateOrder, e))?;
        ledger.record(ExchangeStep::CreateOrder, new_order.id);

        let new_order = self
            .orders
            .complete_order(new_order.id)
            .await
            .map_err(|e| (ExchangeStep::CompleteOrder, e))?;
        ledger.record(ExchangeStep::CompleteOrder, new_order.id);

        Ok((return_request, refund, new_order))
    }
}
