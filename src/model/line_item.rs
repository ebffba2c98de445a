//! Parts used on a work order.

use serde::{Deserialize, Serialize};

use super::WorkOrderId;

/// Product/part identifier from the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A part usage record, unique per `(work_order_id, product_id)`.
/// A persisted line item always has `qty > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub work_order_id: WorkOrderId,
    pub product_id: ProductId,
    pub qty: u32,
    /// Unit price in cents.
    pub rate_cents: i64,
}

/// How a quantity should change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QtyChange {
    /// Relative change. Not safe to replay.
    Delta(i64),
    /// Absolute quantity the client wants to end up with. Safe to replay.
    Target(u32),
    /// Remove the line item regardless of quantity.
    Clear,
}

/// Body of a parts request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartAdjustment {
    #[serde(alias = "partId")]
    pub product_id: ProductId,
    pub change: QtyChange,
    /// Unit price used when the change creates the line item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_cents: Option<i64>,
}

impl PartAdjustment {
    pub fn new(product_id: ProductId, change: QtyChange) -> Self {
        Self {
            product_id,
            change,
            rate_cents: None,
        }
    }

    pub fn rate_cents(mut self, rate_cents: i64) -> Self {
        self.rate_cents = Some(rate_cents);
        self
    }
}

/// Canonical outcome of a quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustOutcome {
    pub qty: u32,
    pub deleted: bool,
}

impl AdjustOutcome {
    pub fn kept(qty: u32) -> Self {
        Self { qty, deleted: false }
    }

    pub fn removed() -> Self {
        Self {
            qty: 0,
            deleted: true,
        }
    }
}
