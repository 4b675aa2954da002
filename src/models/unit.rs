use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderItem;

/// A reference to one physical unit of an order line.
///
/// `Placeholder` identifiers are synthesized locally when the backend has no
/// unit list for a line. They are never treated as real serial numbers: they
/// cannot be reactivated and they are stripped before a return item is built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "code", rename_all = "snake_case")]
pub enum UnitRef {
    Serialized(String),
    Placeholder(String),
}

impl UnitRef {
    /// Deterministic placeholder for the `sequence`-th unit (1-based) of a line.
    pub fn placeholder(order_number: &str, product_id: Uuid, sequence: u32) -> Self {
        UnitRef::Placeholder(format!(
            "{}-{}-{:03}",
            order_number,
            product_id.simple(),
            sequence
        ))
    }

    pub fn code(&self) -> &str {
        match self {
            UnitRef::Serialized(code) | UnitRef::Placeholder(code) => code,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, UnitRef::Serialized(_))
    }

    /// The code to store on a return item, if any.
    pub fn serial_code(&self) -> Option<&str> {
        match self {
            UnitRef::Serialized(code) => Some(code),
            UnitRef::Placeholder(_) => None,
        }
    }
}

impl std::fmt::Display for UnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Successful response of the remote assignment oracle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub order_item: OrderItem,
    pub consumed_unit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_deterministic_and_not_authoritative() {
        let product_id = Uuid::nil();
        let first = UnitRef::placeholder("ORD-7", product_id, 1);
        assert_eq!(first, UnitRef::placeholder("ORD-7", product_id, 1));
        assert_ne!(first, UnitRef::placeholder("ORD-7", product_id, 2));
        assert!(!first.is_authoritative());
        assert_eq!(first.serial_code(), None);
        assert_eq!(
            first.code(),
            "ORD-7-00000000000000000000000000000000-001"
        );
    }

    #[test]
    fn serialized_units_keep_their_code() {
        let unit = UnitRef::Serialized("SN-123456".into());
        assert!(unit.is_authoritative());
        assert_eq!(unit.serial_code(), Some("SN-123456"));
        assert_eq!(unit.to_string(), "SN-123456");
    }
}
