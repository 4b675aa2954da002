use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Enum representing the possible statuses of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    ReadyForShipment,
    Shipped,
    Completed,
    Cancelled,
}

/// One ordered product line.
///
/// In the scanning domain every line consumes exactly one serialized unit,
/// whatever its ordered quantity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Stock batch the line was allocated from, when the backend tracks one.
    pub batch_id: Option<Uuid>,
    /// Ground-truth unit codes known for this line. Empty when the backend supplies none.
    #[serde(default)]
    pub known_units: Vec<String>,
    /// Unit code consumed by this line during fulfillment.
    pub consumed_unit: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub fn is_resolved(&self) -> bool {
        self.consumed_unit.is_some()
    }

    /// Every unit code the backend has ever bound to this line.
    pub fn authoritative_units(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.known_units.iter().map(String::as_str).collect();
        if let Some(consumed) = self.consumed_unit.as_deref() {
            if !units.contains(&consumed) {
                units.push(consumed);
            }
        }
        units
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    pub fn item(&self, order_item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.id == order_item_id)
    }

    pub fn item_mut(&mut self, order_item_id: Uuid) -> Option<&mut OrderItem> {
        self.items.iter_mut().find(|item| item.id == order_item_id)
    }
}

/// Payload for creating a brand-new order.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct NewOrder {
    /// Order this one was created from, e.g. the original order of an exchange.
    pub source_order_id: Option<Uuid>,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<NewOrderItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub product_name: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
    pub unit_price: Decimal,
    pub batch_id: Option<Uuid>,
}

impl NewOrder {
    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(quantity: u32, price: Decimal) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Headphones".into(),
            quantity,
            unit_price: price,
            batch_id: None,
            known_units: vec!["SN-000001".into()],
            consumed_unit: None,
        }
    }

    #[test]
    fn order_total_sums_line_totals() {
        let order = Order {
            id: Uuid::new_v4(),
            order_number: "ORD-1001".into(),
            status: OrderStatus::Processing,
            items: vec![item(2, dec!(10.50)), item(1, dec!(4.00))],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(order.total(), dec!(25.00));
    }

    #[test]
    fn consumed_unit_counts_as_authoritative() {
        let mut line = item(1, dec!(1));
        line.consumed_unit = Some("SN-000002".into());
        assert_eq!(line.authoritative_units(), vec!["SN-000001", "SN-000002"]);

        line.consumed_unit = Some("SN-000001".into());
        assert_eq!(line.authoritative_units(), vec!["SN-000001"]);
    }

    #[test]
    fn order_status_uses_snake_case() {
        assert_eq!(OrderStatus::ReadyForShipment.to_string(), "ready_for_shipment");
        assert_eq!(
            "ready_for_shipment".parse::<OrderStatus>().ok(),
            Some(OrderStatus::ReadyForShipment)
        );
    }
}
