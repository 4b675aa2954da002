// Core models
pub mod bulk;
pub mod order;
pub mod r#return;
pub mod refund;
pub mod scan;
pub mod unit;

pub use bulk::{DispatchFailure, DispatchReport, NewVariant, PrintedLabel, Variant};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};
pub use r#return::{
    NewReturn, QualityCheck, ReturnItem, ReturnRequest, ReturnStatus, ReturnTransition, ReturnType,
};
pub use refund::{NewRefund, Refund, RefundMethod, RefundStatus, RefundTransition, RefundType};
pub use scan::{ScanHistoryEntry, ScanOutcome, ScanOutcomeKind, ScanProgress};
pub use unit::{Assignment, UnitRef};
