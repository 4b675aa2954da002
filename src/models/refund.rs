use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RefundStatus {
    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

/// How the refund amount is derived from the return's refundable total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RefundType {
    Full,
    /// Percentage of the original amount, 0 to 100.
    Percentage(Decimal),
    PartialAmount(Decimal),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundMethod {
    OriginalPayment,
    StoreCredit,
    BankTransfer,
    Cash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub return_id: Uuid,
    pub refund_type: RefundType,
    pub method: RefundMethod,
    pub original_amount: Decimal,
    pub fee: Decimal,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub transaction_refs: Vec<String>,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRefund {
    pub return_id: Uuid,
    pub refund_type: RefundType,
    pub method: RefundMethod,
    pub original_amount: Decimal,
    pub fee: Decimal,
    pub amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RefundTransition {
    Process,
    Complete { transaction_refs: Vec<String> },
    Fail { reason: String },
    Cancel { reason: String },
}

impl RefundTransition {
    pub fn target_status(&self) -> RefundStatus {
        match self {
            RefundTransition::Process => RefundStatus::Processing,
            RefundTransition::Complete { .. } => RefundStatus::Completed,
            RefundTransition::Fail { .. } => RefundStatus::Failed,
            RefundTransition::Cancel { .. } => RefundStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RefundStatus::Pending, RefundStatus::Processing, true)]
    #[case(RefundStatus::Pending, RefundStatus::Cancelled, true)]
    #[case(RefundStatus::Processing, RefundStatus::Completed, true)]
    #[case(RefundStatus::Processing, RefundStatus::Failed, true)]
    #[case(RefundStatus::Processing, RefundStatus::Cancelled, true)]
    #[case(RefundStatus::Pending, RefundStatus::Completed, false)]
    #[case(RefundStatus::Pending, RefundStatus::Failed, false)]
    #[case(RefundStatus::Completed, RefundStatus::Cancelled, false)]
    #[case(RefundStatus::Failed, RefundStatus::Processing, false)]
    fn refund_status_transitions(
        #[case] from: RefundStatus,
        #[case] to: RefundStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }
}
