#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use retail_ops_engine::{
    config::AppConfig,
    events,
    gateways::InMemoryBackend,
    models::{Order, OrderItem, OrderStatus},
    services::{RequestedLine, UnitMapping},
    Engine, Gateways,
};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One line of a seeded order.
#[derive(Debug, Clone)]
pub struct LineSpec {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Unit codes the backend knows for this line. Each is registered as a sellable unit.
    pub units: Vec<String>,
    pub batch_id: Option<Uuid>,
}

impl LineSpec {
    /// A quantity-1 line with one serialized unit.
    pub fn serialized(name: &str, unit_price: Decimal, code: &str) -> Self {
        Self {
            name: name.to_string(),
            quantity: 1,
            unit_price,
            units: vec![code.to_string()],
            batch_id: None,
        }
    }

    /// A line whose units the backend does not track, allocated from a stock batch.
    pub fn untracked(name: &str, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            name: name.to_string(),
            quantity,
            unit_price,
            units: Vec::new(),
            batch_id: Some(Uuid::new_v4()),
        }
    }

    pub fn with_units(mut self, quantity: u32, codes: &[&str]) -> Self {
        self.quantity = quantity;
        self.units = codes.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Engine wired against a fresh in-memory backend, with the event channel drained in the background.
pub struct TestEngine {
    pub engine: Engine,
    pub backend: Arc<InMemoryBackend>,
    _event_task: JoinHandle<()>,
}

impl TestEngine {
    /// Must be called from inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let (engine, rx) = Engine::new(config, Gateways::from_backend(backend.clone()));
        let event_task = tokio::spawn(events::process_events(rx));
        Self {
            engine,
            backend,
            _event_task: event_task,
        }
    }

    /// Inserts a processing order with the given lines and registers their units.
    pub fn seed_order(&self, lines: &[LineSpec]) -> Order {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let items = lines
            .iter()
            .map(|line| {
                let product_id = Uuid::new_v4();
                for code in &line.units {
                    self.backend.register_unit(code.clone(), product_id);
                }
                OrderItem {
                    id: Uuid::new_v4(),
                    order_id,
                    product_id,
                    product_name: line.name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    batch_id: line.batch_id,
                    known_units: line.units.clone(),
                    consumed_unit: None,
                }
            })
            .collect();
        let order = Order {
            id: order_id,
            order_number: format!("ORD-{}", &order_id.simple().to_string()[..8]),
            status: OrderStatus::Processing,
            items,
            created_at: now,
            updated_at: now,
        };
        self.backend.insert_order(order.clone());
        order
    }

    /// Maps `codes` against the stored order with no explicit quantities.
    pub async fn map(&self, order_id: Uuid, codes: &[&str]) -> UnitMapping {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        self.engine
            .unit_mapper
            .resolve(order_id, &codes, &[])
            .await
            .expect("order exists")
    }

    pub async fn map_with(
        &self,
        order_id: Uuid,
        codes: &[&str],
        requested: &[RequestedLine],
    ) -> UnitMapping {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        self.engine
            .unit_mapper
            .resolve(order_id, &codes, requested)
            .await
            .expect("order exists")
    }
}
