//! Retail operations engine
//!
//! Serialized-unit reconciliation for fulfillment and returns, the return,
//! refund and exchange lifecycles, and a resilient batch runner for bulk
//! courier, printing and catalog work. Persistence lives behind the traits
//! in [`gateways`]; [`gateways::InMemoryBackend`] implements all of them.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod metrics;
pub mod models;
pub mod services;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::events::{Event, EventSender};
use crate::gateways::{
    AssignmentOracle, CatalogGateway, CourierGateway, InventoryGateway, LabelGateway,
    OrderGateway, RefundGateway, ReturnGateway,
};
use crate::services::{
    BulkOperations, BulkPolicies, ExchangeCoordinator, RefundService, ReturnService,
    ScanResolver, UnitMapper,
};

/// Every remote collaborator the engine talks to.
#[derive(Clone)]
pub struct Gateways {
    pub oracle: Arc<dyn AssignmentOracle>,
    pub orders: Arc<dyn OrderGateway>,
    pub returns: Arc<dyn ReturnGateway>,
    pub refunds: Arc<dyn RefundGateway>,
    pub inventory: Arc<dyn InventoryGateway>,
    pub courier: Arc<dyn CourierGateway>,
    pub labels: Arc<dyn LabelGateway>,
    pub catalog: Arc<dyn CatalogGateway>,
}

impl Gateways {
    /// All collaborators served by one backend.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AssignmentOracle
            + OrderGateway
            + ReturnGateway
            + RefundGateway
            + InventoryGateway
            + CourierGateway
            + LabelGateway
            + CatalogGateway
            + 'static,
    {
        Self {
            oracle: backend.clone(),
            orders: backend.clone(),
            returns: backend.clone(),
            refunds: backend.clone(),
            inventory: backend.clone(),
            courier: backend.clone(),
            labels: backend.clone(),
            catalog: backend,
        }
    }
}

/// The wired services of one engine instance.
#[derive(Clone)]
pub struct Engine {
    pub config: AppConfig,
    pub event_sender: Arc<EventSender>,
    pub scan_resolver: Arc<ScanResolver>,
    pub unit_mapper: Arc<UnitMapper>,
    pub returns: Arc<ReturnService>,
    pub refunds: Arc<RefundService>,
    pub exchanges: Arc<ExchangeCoordinator>,
    pub bulk: Arc<BulkOperations>,
}

impl Engine {
    /// Wires every service against `gateways`. The receiver carries the
    /// domain events; hand it to [`events::process_events`] or drain it yourself.
    pub fn new(config: AppConfig, gateways: Gateways) -> (Self, mpsc::Receiver<Event>) {
        let (sender, rx) = events::channel(config.event_channel_capacity);
        let event_sender = Arc::new(sender);

        let scan_resolver = Arc::new(ScanResolver::new(
            gateways.oracle.clone(),
            gateways.orders.clone(),
            event_sender.clone(),
            config.scan.min_code_length,
        ));
        let unit_mapper = Arc::new(UnitMapper::new(
            gateways.orders.clone(),
            gateways.returns.clone(),
        ));
        let returns = Arc::new(ReturnService::new(
            gateways.returns.clone(),
            gateways.orders.clone(),
            gateways.inventory.clone(),
            event_sender.clone(),
        ));
        let refunds = Arc::new(RefundService::new(
            gateways.refunds.clone(),
            gateways.returns.clone(),
            event_sender.clone(),
        ));
        let exchanges = Arc::new(ExchangeCoordinator::new(
            returns.clone(),
            refunds.clone(),
            gateways.orders.clone(),
            event_sender.clone(),
        ));
        let bulk = Arc::new(BulkOperations::new(
            gateways.courier,
            gateways.labels,
            gateways.catalog,
            event_sender.clone(),
            BulkPolicies::from(&config),
        ));

        let engine = Self {
            config,
            event_sender,
            scan_resolver,
            unit_mapper,
            returns,
            refunds,
            exchanges,
            bulk,
        };
        (engine, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::InMemoryBackend;

    #[tokio::test]
    async fn engine_wires_against_the_in_memory_backend() {
        let backend = Arc::new(InMemoryBackend::default());
        let (engine, _rx) = Engine::new(AppConfig::default(), Gateways::from_backend(backend));
        assert_eq!(engine.config.scan.min_code_length, 6);
        assert_eq!(engine.bulk.runner(services::BulkOperation::Dispatch).policy().worker_count, 5);
    }
}
