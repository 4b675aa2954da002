use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ErrorResponse;

/// Response of the courier's bulk dispatch endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub success: Vec<Uuid>,
    pub failed: Vec<DispatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub id: Uuid,
    pub error: ErrorResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintedLabel {
    pub order_id: Uuid,
    pub label_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewVariant {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub attributes: BTreeMap<String, String>,
    pub price: Decimal,
}
