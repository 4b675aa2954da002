use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::{RefundGateway, ReturnGateway};
use crate::metrics;
use crate::models::{
    NewRefund, Refund, RefundMethod, RefundStatus, RefundTransition, RefundType, ReturnStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRefundCommand {
    pub return_id: Uuid,
    pub refund_type: RefundType,
    pub method: RefundMethod,
    /// Defaults to the fee agreed when the return was approved.
    pub fee: Option<Decimal>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Refund amount for the given mode.
///
/// `Full` and `Percentage` subtract the fee; `PartialAmount` is taken as is.
pub fn compute_refund_amount(
    original_amount: Decimal,
    refund_type: &RefundType,
    fee: Decimal,
) -> Result<Decimal, ServiceError> {
    if original_amount < Decimal::ZERO || fee < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amounts must not be negative".to_string(),
        ));
    }
    let amount = match refund_type {
        RefundType::Full => original_amount - fee,
        RefundType::Percentage(p) => {
            if *p <= Decimal::ZERO || *p > Decimal::ONE_HUNDRED {
                return Err(ServiceError::ValidationError(format!(
                    "Refund percentage {} must be in (0, 100]",
                    p
                )));
            }
            original_amount * *p / Decimal::ONE_HUNDRED - fee
        }
        RefundType::PartialAmount(a) => *a,
    };
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Refund amount {} must be positive",
            amount
        )));
    }
    Ok(amount.round_dp(2))
}

/// Monetary settlement of completed returns.
#[derive(Clone)]
pub struct RefundService {
    refunds: Arc<dyn RefundGateway>,
    returns: Arc<dyn ReturnGateway>,
    event_sender: Arc<EventSender>,
}

impl RefundService {
    pub fn new(
        refunds: Arc<dyn RefundGateway>,
        returns: Arc<dyn ReturnGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            refunds,
            returns,
            event_sender,
        }
    }

    /// Refundable total of the return minus every completed refund. Never negative.
    pub async fn remaining_balance(&self, return_id: Uuid) -> Result<Decimal, ServiceError> {
        let request = self.returns.get_return(return_id).await?;
        let refunded = self.completed_total(return_id).await?;
        Ok((request.total_refund_amount - refunded).max(Decimal::ZERO))
    }

    async fn completed_total(&self, return_id: Uuid) -> Result<Decimal, ServiceError> {
        Ok(self
            .refunds
            .list_refunds_for_return(return_id)
            .await?
            .iter()
            .filter(|r| r.status == RefundStatus::Completed)
            .map(|r| r.amount)
            .sum())
    }

    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn create(&self, command: CreateRefundCommand) -> Result<Refund, ServiceError> {
        command.validate()?;

        let request = self.returns.get_return(command.return_id).await?;
        if request.status != ReturnStatus::Completed {
            return Err(ServiceError::InvalidState(format!(
                "Refunds require a completed return, return {} is {}",
                request.id, request.status
            )));
        }

        let fee = command.fee.unwrap_or(request.fee);
        let original_amount = request.total_refund_amount;
        let amount = compute_refund_amount(original_amount, &command.refund_type, fee)?;
        let remaining =
            (original_amount - self.completed_total(request.id).await?).max(Decimal::ZERO);
        if amount > remaining {
            warn!(requested = %amount, remaining = %remaining, "Refund exceeds balance");
            return Err(ServiceError::BalanceExceeded {
                requested: amount,
                remaining,
            });
        }

        let refund = self
            .refunds
            .create_refund(NewRefund {
                return_id: request.id,
                refund_type: command.refund_type,
                method: command.method,
                original_amount,
                fee,
                amount,
                notes: command.notes,
            })
            .await
            .map_err(|e| {
                error!("Failed to create refund for return {}: {}", request.id, e);
                e
            })?;

        info!(refund_id = %refund.id, amount = %amount, "Refund created");
        self.event_sender
            .send_or_log(Event::RefundCreated {
                refund_id: refund.id,
                return_id: request.id,
                amount,
            })
            .await;
        Ok(refund)
    }

    pub async fn get_refund(&self, refund_id: Uuid) -> Result<Refund, ServiceError> {
        self.refunds.get_refund(refund_id).await
    }

    #[instrument(skip(self), fields(refund_id = %refund_id))]
    pub async fn process(&self, refund_id: Uuid) -> Result<Refund, ServiceError> {
        self.load_for(refund_id, RefundStatus::Processing).await?;
        let refund = self
            .refunds
            .update_refund(refund_id, RefundTransition::Process)
            .await?;
        info!("Refund processing");
        self.event_sender
            .send_or_log(Event::RefundProcessing(refund_id))
            .await;
        Ok(refund)
    }

    /// Completes a processing refund after re-checking the return's remaining balance.
    #[instrument(skip(self, transaction_refs), fields(refund_id = %refund_id))]
    pub async fn complete(
        &self,
        refund_id: Uuid,
        transaction_refs: Vec<String>,
    ) -> Result<Refund, ServiceError> {
        let current = self.load_for(refund_id, RefundStatus::Completed).await?;
        let remaining = self.remaining_balance(current.return_id).await?;
        if current.amount > remaining {
            return Err(ServiceError::BalanceExceeded {
                requested: current.amount,
                remaining,
            });
        }

        let refund = self
            .refunds
            .update_refund(refund_id, RefundTransition::Complete { transaction_refs })
            .await?;

        metrics::REFUNDS_COMPLETED.inc();
        info!(amount = %refund.amount, "Refund completed");
        self.event_sender
            .send_or_log(Event::RefundCompleted {
                refund_id,
                amount: refund.amount,
            })
            .await;
        Ok(refund)
    }

    #[instrument(skip(self, reason), fields(refund_id = %refund_id))]
    pub async fn fail(&self, refund_id: Uuid, reason: String) -> Result<Refund, ServiceError> {
        self.load_for(refund_id, RefundStatus::Failed).await?;
        let refund = self
            .refunds
            .update_refund(
                refund_id,
                RefundTransition::Fail {
                    reason: reason.clone(),
                },
            )
            .await?;
        warn!(reason = %reason, "Refund failed");
        self.event_sender
            .send_or_log(Event::RefundFailed { refund_id, reason })
            .await;
        Ok(refund)
    }

    #[instrument(skip(self, reason), fields(refund_id = %refund_id))]
    pub async fn cancel(&self, refund_id: Uuid, reason: String) -> Result<Refund, ServiceError> {
        self.load_for(refund_id, RefundStatus::Cancelled).await?;
        let refund = self
            .refunds
            .update_refund(
                refund_id,
                RefundTransition::Cancel {
                    reason: reason.clone(),
                },
            )
            .await?;
        info!(reason = %reason, "Refund cancelled");
        self.event_sender
            .send_or_log(Event::RefundCancelled { refund_id, reason })
            .await;
        Ok(refund)
    }

    async fn load_for(
        &self,
        refund_id: Uuid,
        target: RefundStatus,
    ) -> Result<Refund, ServiceError> {
        let current = self.refunds.get_refund(refund_id).await?;
        if !current.status.can_transition_to(target) {
            error!(
                "Invalid refund transition from {} to {} for {}",
                current.status, target, refund_id
            );
            return Err(ServiceError::invalid_transition(
                "refund",
                current.status,
                target.as_ref(),
            ));
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::gateways::{MockRefundGateway, MockReturnGateway};
    use crate::models::{ReturnRequest, ReturnType};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(RefundType::Full, dec!(1000), dec!(20), dec!(980))]
    #[case(RefundType::Percentage(dec!(50)), dec!(1000), dec!(20), dec!(480))]
    #[case(RefundType::Percentage(dec!(100)), dec!(80), dec!(0), dec!(80))]
    #[case(RefundType::PartialAmount(dec!(125.50)), dec!(1000), dec!(20), dec!(125.50))]
    fn refund_amount_by_mode(
        #[case] refund_type: RefundType,
        #[case] original: Decimal,
        #[case] fee: Decimal,
        #[case] expected: Decimal,
    ) {
        assert_eq!(
            compute_refund_amount(original, &refund_type, fee).unwrap(),
            expected
        );
    }

    #[rstest]
    #[case(RefundType::Percentage(dec!(0)))]
    #[case(RefundType::Percentage(dec!(150)))]
    #[case(RefundType::PartialAmount(dec!(-5)))]
    fn invalid_refund_modes_are_rejected(#[case] refund_type: RefundType) {
        assert_matches!(
            compute_refund_amount(dec!(100), &refund_type, dec!(0)),
            Err(ServiceError::ValidationError(_))
        );
    }

    fn completed_return(total: Decimal) -> ReturnRequest {
        ReturnRequest {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            reason: "wrong size".into(),
            return_type: ReturnType::Refund,
            status: ReturnStatus::Completed,
            items: vec![],
            quality_check: None,
            total_refund_amount: total,
            fee: Decimal::ZERO,
            rejection_reason: None,
            inventory_restored: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_rejects_amounts_above_remaining_balance() {
        let request = completed_return(dec!(100));
        let return_id = request.id;
        let mut returns = MockReturnGateway::new();
        returns
            .expect_get_return()
            .returning(move |_| Ok(request.clone()));

        let mut refunds = MockRefundGateway::new();
        refunds.expect_list_refunds_for_return().returning(move |rid| {
            Ok(vec![Refund {
                id: Uuid::new_v4(),
                return_id: rid,
                refund_type: RefundType::PartialAmount(dec!(70)),
                method: RefundMethod::Cash,
                original_amount: dec!(100),
                fee: dec!(0),
                amount: dec!(70),
                status: RefundStatus::Completed,
                transaction_refs: vec!["TX-1".into()],
                notes: None,
                failure_reason: None,
                cancellation_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }])
        });
        refunds.expect_create_refund().never();

        let (sender, _rx) = events::channel(8);
        let svc = RefundService::new(Arc::new(refunds), Arc::new(returns), Arc::new(sender));
        let result = svc
            .create(CreateRefundCommand {
                return_id,
                refund_type: RefundType::PartialAmount(dec!(40)),
                method: RefundMethod::StoreCredit,
                fee: None,
                notes: None,
            })
            .await;

        assert_matches!(
            result,
            Err(ServiceError::BalanceExceeded { requested, remaining })
                if requested == dec!(40) && remaining == dec!(30)
        );
    }

    #[tokio::test]
    async fn create_requires_completed_return() {
        let mut request = completed_return(dec!(100));
        request.status = ReturnStatus::Processed;
        let return_id = request.id;
        let mut returns = MockReturnGateway::new();
        returns
            .expect_get_return()
            .returning(move |_| Ok(request.clone()));

        let (sender, _rx) = events::channel(8);
        let svc = RefundService::new(
            Arc::new(MockRefundGateway::new()),
            Arc::new(returns),
            Arc::new(sender),
        );
        let result = svc
            .create(CreateRefundCommand {
                return_id,
                refund_type: RefundType::Full,
                method: RefundMethod::OriginalPayment,
                fee: None,
                notes: None,
            })
            .await;
        assert_matches!(result, Err(ServiceError::InvalidState(_)));
    }
}
