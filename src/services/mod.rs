// Fulfillment and reconciliation
pub mod fulfillment;
pub mod unit_mapper;

// Return, refund and exchange lifecycles
pub mod exchanges;
pub mod refunds;
pub mod returns;

// Bulk execution
pub mod batch_runner;
pub mod bulk_operations;
pub mod retry;

pub use batch_runner::{
    BatchItemDetail, BatchPolicy, BatchProgress, BatchReport, BatchRunner, CancelHandle,
    ItemStatus,
};
pub use bulk_operations::{BulkOperation, BulkOperations, BulkPolicies};
pub use exchanges::{
    ExchangeCommand, ExchangeCoordinator, ExchangeError, ExchangeLedger, ExchangeOutcome,
    ExchangeStep, LedgerEntry,
};
pub use fulfillment::{FulfillmentSession, ScanResolver};
pub use refunds::{compute_refund_amount, CreateRefundCommand, RefundService};
pub use retry::{with_retry, RetryConfig, RetryOutcome, RetryPolicy, TransientErrorPolicy};
pub use returns::{
    ApproveReturnCommand, CreateReturnCommand, RecordQualityCheckCommand, ReturnService,
};
pub use unit_mapper::{known_units, map_units, MappedItem, RequestedLine, UnitMapper, UnitMapping};
