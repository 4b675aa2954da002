/*!
 * # Remote collaborator contracts
 *
 * The engine never owns persistence. Orders, returns, refunds, inventory,
 * the courier, the label printer and the catalog all live behind these
 * traits; every call returns either the updated record or a `ServiceError`
 * whose `kind()` is the machine-checkable error class of the remote reply.
 */

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{
    Assignment, DispatchReport, NewOrder, NewRefund, NewReturn, NewVariant, Order, PrintedLabel,
    Refund, RefundTransition, ReturnRequest, ReturnTransition, Variant,
};

pub mod memory;

pub use memory::InMemoryBackend;

/// Authoritative matcher that binds a scanned unit code to one order line.
///
/// Expected error kinds: `NotFound` for unknown codes, `Mismatch` when the
/// code belongs to another product, `Conflict` when the unit is already
/// consumed, `Validation` for malformed input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssignmentOracle: Send + Sync {
    async fn try_assign(
        &self,
        order_id: Uuid,
        order_item_id: Uuid,
        code: &str,
    ) -> Result<Assignment, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError>;
    async fn mark_ready_for_shipment(&self, order_id: Uuid) -> Result<Order, ServiceError>;
    async fn create_order(&self, order: NewOrder) -> Result<Order, ServiceError>;
    async fn complete_order(&self, order_id: Uuid) -> Result<Order, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReturnGateway: Send + Sync {
    async fn create_return(&self, payload: NewReturn) -> Result<ReturnRequest, ServiceError>;
    async fn get_return(&self, return_id: Uuid) -> Result<ReturnRequest, ServiceError>;
    async fn list_returns_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<ReturnRequest>, ServiceError>;
    async fn update_return(
        &self,
        return_id: Uuid,
        transition: ReturnTransition,
    ) -> Result<ReturnRequest, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RefundGateway: Send + Sync {
    async fn create_refund(&self, payload: NewRefund) -> Result<Refund, ServiceError>;
    async fn get_refund(&self, refund_id: Uuid) -> Result<Refund, ServiceError>;
    async fn list_refunds_for_return(&self, return_id: Uuid)
        -> Result<Vec<Refund>, ServiceError>;
    async fn update_refund(
        &self,
        refund_id: Uuid,
        transition: RefundTransition,
    ) -> Result<Refund, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    /// Makes a previously consumed unit sellable again.
    async fn reactivate_unit(&self, code: &str) -> Result<(), ServiceError>;
    /// Adds `quantity` to the free stock of the batch (or of the product when untracked).
    async fn restock_batch(
        &self,
        product_id: Uuid,
        batch_id: Option<Uuid>,
        quantity: u32,
    ) -> Result<(), ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CourierGateway: Send + Sync {
    async fn bulk_dispatch(&self, order_ids: Vec<Uuid>) -> Result<DispatchReport, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelGateway: Send + Sync {
    async fn print_label(&self, order_id: Uuid) -> Result<PrintedLabel, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn create_variant(&self, variant: NewVariant) -> Result<Variant, ServiceError>;
}
