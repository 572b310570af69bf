//! Product records as imported into the label generator

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Quantity as it appears in imported data: usually a number, sometimes text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Number(n) => write!(f, "{}", n),
            Quantity::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Quantity {
    fn from(n: u64) -> Self {
        Quantity::Number(n.into())
    }
}

/// One row of the product list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Stable identifier used for selection membership
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub product_name: String,

    #[serde(default)]
    pub order_number: String,

    #[serde(default)]
    pub product_code: String,

    /// Batch label, free text
    #[serde(default)]
    pub remarks: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Quantity>,
}

impl Product {
    pub fn new(id: &str, product_name: &str) -> Self {
        Self {
            id: id.to_string(),
            product_name: product_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_order_number(mut self, order_number: &str) -> Self {
        self.order_number = order_number.to_string();
        self
    }

    pub fn with_product_code(mut self, product_code: &str) -> Self {
        self.product_code = product_code.to_string();
        self
    }

    pub fn with_remarks(mut self, remarks: &str) -> Self {
        self.remarks = remarks.to_string();
        self
    }

    pub fn with_quantity(mut self, quantity: impl Into<Quantity>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    /// Textual form of the quantity, empty when absent
    pub fn quantity_text(&self) -> String {
        self.quantity.as_ref().map(|q| q.to_string()).unwrap_or_default()
    }

    /// The batch this product belongs to, if it has one
    pub fn batch(&self) -> Option<&str> {
        if self.remarks.is_empty() {
            None
        } else {
            Some(&self.remarks)
        }
    }
}

/// Sorted unique batch labels across the list
pub fn batches(products: &[Product]) -> Vec<String> {
    products
        .iter()
        .filter_map(|p| p.batch())
        .map(String::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
