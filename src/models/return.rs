use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Enum representing the possible statuses of a return.
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
pub enum ReturnStatus {
    Pending,
    Approved,
    Processed,
    Completed,
    Rejected,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Validates if a status transition is allowed
    pub fn can_transition_to(&self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Rejected)
                | (Approved, Processed)
                | (Processed, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReturnStatus::Completed | ReturnStatus::Rejected)
    }
}

/// Why the customer is giving units back.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReturnType {
    Refund,
    Exchange,
}

/// One returned unit (or a quantity of an unserialized line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub quantity: u32,
    /// Real serial number of the returned unit. `None` when only a placeholder was known.
    pub unit_code: Option<String>,
    pub unit_price: Decimal,
    /// Set once this item's unit or batch quantity is back in stock.
    #[serde(default)]
    pub restored: bool,
}

impl ReturnItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub passed: bool,
    pub notes: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
    pub return_type: ReturnType,
    pub status: ReturnStatus,
    pub items: Vec<ReturnItem>,
    pub quality_check: Option<QualityCheck>,
    /// Refundable total; starts as the sum of item totals, may be overridden on approval.
    pub total_refund_amount: Decimal,
    /// Restocking fee agreed on approval.
    pub fee: Decimal,
    pub rejection_reason: Option<String>,
    pub inventory_restored: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReturnRequest {
    pub fn returned_quantity(&self, order_item_id: Uuid) -> u32 {
        self.items
            .iter()
            .filter(|item| item.order_item_id == order_item_id)
            .map(|item| item.quantity)
            .sum()
    }

    pub fn unit_codes(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| item.unit_code.as_deref())
    }

    /// Indices of items whose inventory has not been restored yet.
    pub fn unrestored_items(&self) -> impl Iterator<Item = (usize, &ReturnItem)> {
        self.items.iter().enumerate().filter(|(_, item)| !item.restored)
    }

    pub fn has_passing_quality_check(&self) -> bool {
        self.quality_check.as_ref().map_or(false, |qc| qc.passed)
    }
}

/// Payload sent to the remote return service on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReturn {
    pub order_id: Uuid,
    pub reason: String,
    pub return_type: ReturnType,
    pub items: Vec<ReturnItem>,
    pub total_refund_amount: Decimal,
}

/// Remote update applied to an existing return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReturnTransition {
    RecordQualityCheck(QualityCheck),
    Approve {
        refund_amount: Decimal,
        fee: Decimal,
    },
    Reject {
        reason: String,
    },
    /// Marks one item as put back into inventory; the status does not change.
    RecordRestored {
        item_index: usize,
    },
    Process {
        restore_inventory: bool,
    },
    Complete,
}

impl ReturnTransition {
    /// Status the return ends up in once the transition is applied.
    pub fn target_status(&self, current: ReturnStatus) -> ReturnStatus {
        match self {
            ReturnTransition::RecordQualityCheck(_) => current,
            ReturnTransition::RecordRestored { .. } => current,
            ReturnTransition::Approve { .. } => ReturnStatus::Approved,
            ReturnTransition::Reject { .. } => ReturnStatus::Rejected,
            ReturnTransition::Process { .. } => ReturnStatus::Processed,
            ReturnTransition::Complete => ReturnStatus::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ReturnStatus::Pending, ReturnStatus::Approved, true)]
    #[case(ReturnStatus::Pending, ReturnStatus::Rejected, true)]
    #[case(ReturnStatus::Approved, ReturnStatus::Rejected, true)]
    #[case(ReturnStatus::Approved, ReturnStatus::Processed, true)]
    #[case(ReturnStatus::Processed, ReturnStatus::Completed, true)]
    #[case(ReturnStatus::Pending, ReturnStatus::Processed, false)]
    #[case(ReturnStatus::Pending, ReturnStatus::Completed, false)]
    #[case(ReturnStatus::Processed, ReturnStatus::Rejected, false)]
    #[case(ReturnStatus::Rejected, ReturnStatus::Approved, false)]
    #[case(ReturnStatus::Completed, ReturnStatus::Rejected, false)]
    fn return_status_transitions(
        #[case] from: ReturnStatus,
        #[case] to: ReturnStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn restoring_an_item_keeps_the_status() {
        let transition = ReturnTransition::RecordRestored { item_index: 0 };
        assert_eq!(
            transition.target_status(ReturnStatus::Approved),
            ReturnStatus::Approved
        );
    }

    #[test]
    fn terminal_states() {
        assert!(ReturnStatus::Completed.is_terminal());
        assert!(ReturnStatus::Rejected.is_terminal());
        assert!(!ReturnStatus::Processed.is_terminal());
    }
}
