use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use super::batch_runner::{BatchPolicy, BatchReport, BatchRunner};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateways::{CatalogGateway, CourierGateway, LabelGateway};
use crate::models::{NewVariant, PrintedLabel, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum BulkOperation {
    Dispatch,
    Printing,
    VariantCreation,
}

/// Batch policies of the three bulk operations.
#[derive(Debug, Clone, Copy)]
pub struct BulkPolicies {
    pub dispatch: BatchPolicy,
    pub printing: BatchPolicy,
    pub variant_creation: BatchPolicy,
}

impl From<&AppConfig> for BulkPolicies {
    fn from(config: &AppConfig) -> Self {
        Self {
            dispatch: config.dispatch_policy(),
            printing: config.printing_policy(),
            variant_creation: config.variant_creation_policy(),
        }
    }
}

/// Courier dispatch, label printing and variant creation on top of `BatchRunner`.
pub struct BulkOperations {
    courier: Arc<dyn CourierGateway>,
    labels: Arc<dyn LabelGateway>,
    catalog: Arc<dyn CatalogGateway>,
    event_sender: Arc<EventSender>,
    policies: BulkPolicies,
}

impl BulkOperations {
    pub fn new(
        courier: Arc<dyn CourierGateway>,
        labels: Arc<dyn LabelGateway>,
        catalog: Arc<dyn CatalogGateway>,
        event_sender: Arc<EventSender>,
        policies: BulkPolicies,
    ) -> Self {
        Self {
            courier,
            labels,
            catalog,
            event_sender,
            policies,
        }
    }

    /// A fresh runner configured for `operation`. Subscribe to it or grab its
    /// cancel handle before passing it to the matching method.
    pub fn runner(&self, operation: BulkOperation) -> BatchRunner {
        let policy = match operation {
            BulkOperation::Dispatch => self.policies.dispatch,
            BulkOperation::Printing => self.policies.printing,
            BulkOperation::VariantCreation => self.policies.variant_creation,
        };
        BatchRunner::new(policy)
    }

    /// Hands each order to the courier. The courier reports per-order failures
    /// inside a successful reply; those become item failures.
    #[instrument(skip(self, runner, order_ids), fields(count = order_ids.len()))]
    pub async fn dispatch_orders(
        &self,
        runner: &BatchRunner,
        order_ids: Vec<Uuid>,
    ) -> BatchReport<Uuid> {
        let courier = &self.courier;
        let report = runner
            .run(order_ids, |order_id| async move {
                let reply = courier.bulk_dispatch(vec![order_id]).await?;
                if let Some(failure) = reply.failed.into_iter().find(|f| f.id == order_id) {
                    return Err(ServiceError::from(failure.error));
                }
                if reply.success.contains(&order_id) {
                    Ok(order_id)
                } else {
                    Err(ServiceError::InternalError(format!(
                        "Courier returned no result for order {}",
                        order_id
                    )))
                }
            })
            .await;
        self.finish(BulkOperation::Dispatch, report).await
    }

    #[instrument(skip(self, runner, order_ids), fields(count = order_ids.len()))]
    pub async fn print_labels(
        &self,
        runner: &BatchRunner,
        order_ids: Vec<Uuid>,
    ) -> BatchReport<PrintedLabel> {
        let labels = &self.labels;
        let report = runner
            .run(order_ids, |order_id| labels.print_label(order_id))
            .await;
        self.finish(BulkOperation::Printing, report).await
    }

    #[instrument(skip(self, runner, variants), fields(count = variants.len()))]
    pub async fn create_variants(
        &self,
        runner: &BatchRunner,
        variants: Vec<NewVariant>,
    ) -> BatchReport<Variant> {
        let catalog = &self.catalog;
        let report = runner
            .run(variants, |variant| catalog.create_variant(variant))
            .await;
        self.finish(BulkOperation::VariantCreation, report).await
    }

    async fn finish<R>(&self, operation: BulkOperation, report: BatchReport<R>) -> BatchReport<R> {
        let progress = &report.progress;
        info!(
            operation = %operation,
            total = progress.total,
            succeeded = progress.success_count,
            failed = progress.fail_count,
            "Bulk operation finished"
        );
        self.event_sender
            .send_or_log(Event::BatchFinished {
                operation: operation.to_string(),
                total: progress.total,
                succeeded: progress.success_count,
                failed: progress.fail_count,
            })
            .await;
        report
    }
}
