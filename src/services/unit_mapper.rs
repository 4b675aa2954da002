use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::gateways::{OrderGateway, ReturnGateway};
use crate::models::{Order, OrderItem, ReturnItem, ReturnStatus, UnitRef};

/// Quantity the caller wants to return for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedLine {
    pub order_item_id: Uuid,
    pub quantity: u32,
}

/// Candidate units grouped under the order line they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedItem {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub batch_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub units: Vec<UnitRef>,
}

impl MappedItem {
    pub fn quantity(&self) -> u32 {
        self.units.len() as u32
    }
}

/// Result of validating candidate unit codes against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMapping {
    pub order_id: Uuid,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub mapped_items: Vec<MappedItem>,
}

impl UnitMapping {
    pub fn mapped_quantity(&self, order_item_id: Uuid) -> u32 {
        self.mapped_items
            .iter()
            .filter(|item| item.order_item_id == order_item_id)
            .map(MappedItem::quantity)
            .sum()
    }

    /// One return item per mapped unit. Placeholder units carry no unit code.
    pub fn to_return_items(&self) -> Vec<ReturnItem> {
        self.mapped_items
            .iter()
            .flat_map(|item| {
                item.units.iter().map(move |unit| ReturnItem {
                    order_item_id: item.order_item_id,
                    product_id: item.product_id,
                    batch_id: item.batch_id,
                    quantity: 1,
                    unit_code: unit.serial_code().map(str::to_string),
                    unit_price: item.unit_price,
                    restored: false,
                })
            })
            .collect()
    }
}

/// Known units of every line, real serials first, placeholders when the backend has none.
pub fn known_units(order: &Order) -> Vec<(&OrderItem, Vec<UnitRef>)> {
    order
        .items
        .iter()
        .map(|item| {
            let authoritative = item.authoritative_units();
            let units = if authoritative.is_empty() {
                (1..=item.quantity.max(1))
                    .map(|seq| UnitRef::placeholder(&order.order_number, item.product_id, seq))
                    .collect()
            } else {
                authoritative
                    .into_iter()
                    .map(|code| UnitRef::Serialized(code.to_string()))
                    .collect()
            };
            (item, units)
        })
        .collect()
}

/// Resolves unit codes to order lines and checks return eligibility.
pub struct UnitMapper {
    orders: Arc<dyn OrderGateway>,
    returns: Arc<dyn ReturnGateway>,
}

impl UnitMapper {
    pub fn new(orders: Arc<dyn OrderGateway>, returns: Arc<dyn ReturnGateway>) -> Self {
        Self { orders, returns }
    }

    /// Fetches the order and its prior returns, then maps `candidate_codes`.
    #[instrument(skip(self, candidate_codes, requested), fields(order_id = %order_id))]
    pub async fn resolve(
        &self,
        order_id: Uuid,
        candidate_codes: &[String],
        requested: &[RequestedLine],
    ) -> Result<UnitMapping, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        let prior_returns = self.returns.list_returns_for_order(order_id).await?;

        let claimed: HashSet<String> = prior_returns
            .iter()
            .filter(|r| r.status != ReturnStatus::Rejected)
            .flat_map(|r| r.unit_codes().map(str::to_string))
            .collect();

        let mapping = map_units(&order, &claimed, candidate_codes, requested);
        if !mapping.valid {
            warn!(errors = ?mapping.errors, "Unit mapping rejected");
        }
        Ok(mapping)
    }
}

/// Pure mapping step. `claimed` holds codes already used by non-rejected returns.
pub fn map_units(
    order: &Order,
    claimed: &HashSet<String>,
    candidate_codes: &[String],
    requested: &[RequestedLine],
) -> UnitMapping {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let index: HashMap<String, (&OrderItem, UnitRef)> = known_units(order)
        .into_iter()
        .flat_map(|(item, units)| {
            units
                .into_iter()
                .map(move |unit| (unit.code().to_string(), (item, unit)))
        })
        .collect();

    let mut seen = HashSet::new();
    let mut grouped: Vec<MappedItem> = Vec::new();

    for raw in candidate_codes {
        let code = raw.trim();
        if code.is_empty() {
            continue;
        }
        if !seen.insert(code.to_string()) {
            errors.push(format!("Unit {} was submitted more than once", code));
            continue;
        }
        let Some((item, unit)) = index.get(code) else {
            errors.push(format!(
                "Unit {} does not belong to order {}",
                code, order.order_number
            ));
            continue;
        };
        if claimed.contains(code) {
            errors.push(format!("Unit {} is already part of another return", code));
            continue;
        }
        if !unit.is_authoritative() {
            warnings.push(format!(
                "Unit {} of {} is a synthesized placeholder, not a real serial number",
                code, item.product_name
            ));
        }

        match grouped.iter_mut().find(|m| m.order_item_id == item.id) {
            Some(mapped) => mapped.units.push(unit.clone()),
            None => grouped.push(MappedItem {
                order_item_id: item.id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                batch_id: item.batch_id,
                unit_price: item.unit_price,
                units: vec![unit.clone()],
            }),
        }
    }

    for line in requested {
        let Some(item) = order.item(line.order_item_id) else {
            errors.push(format!(
                "Order item {} is not part of order {}",
                line.order_item_id, order.order_number
            ));
            continue;
        };
        let mapped = grouped
            .iter()
            .find(|m| m.order_item_id == item.id)
            .map(MappedItem::quantity)
            .unwrap_or(0);
        if line.quantity > mapped {
            warnings.push(format!(
                "Requested {} of {} but only {} unit(s) could be accounted for",
                line.quantity, item.product_name, mapped
            ));
        }
    }

    if grouped.is_empty() && errors.is_empty() {
        errors.push("No returnable units were supplied".to_string());
    }

    UnitMapping {
        order_id: order.id,
        valid: errors.is_empty(),
        errors,
        warnings,
        mapped_items: grouped,
    }
}
