//! Integration tests for refunds against completed returns.

mod common;

use assert_matches::assert_matches;
use common::{LineSpec, TestEngine};
use retail_ops_engine::errors::ServiceError;
use retail_ops_engine::models::{RefundMethod, RefundStatus, RefundType, ReturnRequest, ReturnType};
use retail_ops_engine::services::{
    ApproveReturnCommand, CreateRefundCommand, CreateReturnCommand, RecordQualityCheckCommand,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Runs a one-unit return of `price` through to completion with the given approval fee.
async fn completed_return(app: &TestEngine, price: Decimal, fee: Decimal) -> ReturnRequest {
    let code = format!("SN-{}", &Uuid::new_v4().simple().to_string()[..10]);
    let order = app.seed_order(&[LineSpec::serialized("Laptop", price, &code)]);
    let returns = &app.engine.returns;

    let mapping = app.map(order.id, &[code.as_str()]).await;
    let created = returns
        .create(
            CreateReturnCommand {
                order_id: order.id,
                reason: "Defective keyboard".into(),
                return_type: ReturnType::Refund,
            },
            &mapping,
        )
        .await
        .unwrap();
    returns
        .record_quality_check(
            created.id,
            RecordQualityCheckCommand {
                passed: true,
                notes: None,
            },
        )
        .await
        .unwrap();
    returns
        .approve(
            created.id,
            ApproveReturnCommand {
                refund_amount_override: None,
                fee: Some(fee),
            },
        )
        .await
        .unwrap();
    returns.process(created.id, true).await.unwrap();
    returns.complete(created.id).await.unwrap()
}

fn refund_cmd(return_id: Uuid, refund_type: RefundType) -> CreateRefundCommand {
    CreateRefundCommand {
        return_id,
        refund_type,
        method: RefundMethod::OriginalPayment,
        fee: None,
        notes: None,
    }
}

#[tokio::test]
async fn half_refund_subtracts_the_approval_fee() {
    let app = TestEngine::new();
    let request = completed_return(&app, dec!(1000), dec!(20)).await;

    let refund = app
        .engine
        .refunds
        .create(refund_cmd(request.id, RefundType::Percentage(dec!(50))))
        .await
        .unwrap();

    assert_eq!(refund.amount, dec!(480));
    assert_eq!(refund.fee, dec!(20));
    assert_eq!(refund.original_amount, dec!(1000));
    assert_eq!(refund.status, RefundStatus::Pending);
}

#[tokio::test]
async fn full_refund_completes_and_reduces_the_balance() {
    let app = TestEngine::new();
    let request = completed_return(&app, dec!(1000), dec!(20)).await;
    let refunds = &app.engine.refunds;

    let refund = refunds
        .create(refund_cmd(request.id, RefundType::Full))
        .await
        .unwrap();
    assert_eq!(refund.amount, dec!(980));

    refunds.process(refund.id).await.unwrap();
    let completed = refunds
        .complete(refund.id, vec!["PSP-123".into()])
        .await
        .unwrap();
    assert_eq!(completed.status, RefundStatus::Completed);
    assert_eq!(completed.transaction_refs, vec!["PSP-123".to_string()]);
    assert_eq!(refunds.remaining_balance(request.id).await.unwrap(), dec!(20));

    assert_matches!(
        refunds
            .create(refund_cmd(request.id, RefundType::PartialAmount(dec!(30))))
            .await,
        Err(ServiceError::BalanceExceeded { requested, remaining })
            if requested == dec!(30) && remaining == dec!(20)
    );
}

#[tokio::test]
async fn refunds_require_a_completed_return() {
    let app = TestEngine::new();
    let order = app.seed_order(&[LineSpec::serialized("Phone", dec!(500), "SN-PH-00001")]);
    let created = app
        .engine
        .returns
        .create(
            CreateReturnCommand {
                order_id: order.id,
                reason: "Wrong colour".into(),
                return_type: ReturnType::Refund,
            },
            &app.map(order.id, &["SN-PH-00001"]).await,
        )
        .await
        .unwrap();

    assert_matches!(
        app.engine
            .refunds
            .create(refund_cmd(created.id, RefundType::Full))
            .await,
        Err(ServiceError::InvalidState(_))
    );
}

#[tokio::test]
async fn completion_rechecks_the_balance_against_concurrent_refunds() {
    let app = TestEngine::new();
    let request = completed_return(&app, dec!(1000), Decimal::ZERO).await;
    let refunds = &app.engine.refunds;

    let first = refunds
        .create(refund_cmd(request.id, RefundType::PartialAmount(dec!(600))))
        .await
        .unwrap();
    let second = refunds
        .create(refund_cmd(request.id, RefundType::PartialAmount(dec!(600))))
        .await
        .unwrap();
    refunds.process(first.id).await.unwrap();
    refunds.process(second.id).await.unwrap();

    refunds.complete(first.id, vec!["T-1".into()]).await.unwrap();
    assert_matches!(
        refunds.complete(second.id, vec!["T-2".into()]).await,
        Err(ServiceError::BalanceExceeded { .. })
    );
    assert_eq!(refunds.remaining_balance(request.id).await.unwrap(), dec!(400));

    let cancelled = refunds
        .cancel(second.id, "Balance exhausted".into())
        .await
        .unwrap();
    assert_eq!(cancelled.status, RefundStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Balance exhausted"));
}

#[tokio::test]
async fn failed_refund_is_terminal() {
    let app = TestEngine::new();
    let request = completed_return(&app, dec!(200), Decimal::ZERO).await;
    let refunds = &app.engine.refunds;

    let refund = refunds
        .create(refund_cmd(request.id, RefundType::Full))
        .await
        .unwrap();
    assert_matches!(
        refunds.complete(refund.id, vec![]).await,
        Err(ServiceError::InvalidState(_))
    );

    refunds.process(refund.id).await.unwrap();
    let failed = refunds
        .fail(refund.id, "Card expired".into())
        .await
        .unwrap();
    assert_eq!(failed.status, RefundStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Card expired"));

    assert_matches!(
        refunds.process(refund.id).await,
        Err(ServiceError::InvalidState(_))
    );
    assert_eq!(refunds.remaining_balance(request.id).await.unwrap(), dec!(200));
}

#[tokio::test]
async fn explicit_fee_overrides_the_approval_fee() {
    let app = TestEngine::new();
    let request = completed_return(&app, dec!(100), dec!(10)).await;

    let refund = app
        .engine
        .refunds
        .create(CreateRefundCommand {
            fee: Some(dec!(2.50)),
            method: RefundMethod::StoreCredit,
            ..refund_cmd(request.id, RefundType::Full)
        })
        .await
        .unwrap();
    assert_eq!(refund.amount, dec!(97.50));
    assert_eq!(refund.method, RefundMethod::StoreCredit);
}
