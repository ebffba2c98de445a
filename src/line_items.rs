//! Line-item reconciler.
//!
//! Turns a quantity change into either an update or a delete. A line item
//! whose quantity would reach zero is removed, never stored at zero.

use std::collections::BTreeMap;

use crate::error::{Result, ValidationError};
use crate::model::{AdjustOutcome, LineItem, PartAdjustment, ProductId, QtyChange, WorkOrderId};

/// Apply a quantity change to a work order's line items.
///
/// Absent rows read as quantity zero, so driving an absent product to zero
/// (or clearing it) is a successful no-op. Growing an absent product creates
/// it at `rate_cents` (zero when not given).
pub fn adjust(
    work_order_id: WorkOrderId,
    items: &mut BTreeMap<ProductId, LineItem>,
    adjustment: &PartAdjustment,
) -> Result<AdjustOutcome> {
    let product_id = &adjustment.product_id;
    let current = items.get(product_id).map(|li| li.qty).unwrap_or(0);

    let new_qty: u32 = match adjustment.change {
        QtyChange::Clear => 0,
        QtyChange::Target(target) => target,
        QtyChange::Delta(delta) => {
            let wanted = i64::from(current).saturating_add(delta).max(0);
            u32::try_from(wanted)
                .map_err(|_| ValidationError::single(product_id.to_string(), "quantity too large"))?
        }
    };

    if new_qty == 0 {
        items.remove(product_id);
        return Ok(AdjustOutcome::removed());
    }

    match items.get_mut(product_id) {
        Some(item) => {
            item.qty = new_qty;
            if let Some(rate) = adjustment.rate_cents {
                item.rate_cents = rate;
            }
        }
        None => {
            items.insert(
                product_id.clone(),
                LineItem {
                    work_order_id,
                    product_id: product_id.clone(),
                    qty: new_qty,
                    rate_cents: adjustment.rate_cents.unwrap_or(0),
                },
            );
        }
    }

    Ok(AdjustOutcome::kept(new_qty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(qty: u32) -> (WorkOrderId, BTreeMap<ProductId, LineItem>, ProductId) {
        let wo = WorkOrderId::new();
        let pid = ProductId::new("filter-7");
        let mut items = BTreeMap::new();
        if qty > 0 {
            items.insert(
                pid.clone(),
                LineItem {
                    work_order_id: wo,
                    product_id: pid.clone(),
                    qty,
                    rate_cents: 1299,
                },
            );
        }
        (wo, items, pid)
    }

    #[test]
    fn decrement_to_zero_deletes_row() {
        let (wo, mut items, pid) = setup(2);
        let adj = PartAdjustment::new(pid.clone(), QtyChange::Delta(-1));

        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::kept(1));
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::removed());
        assert!(!items.contains_key(&pid));

        // Further decrements stay absent, never negative.
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::removed());
        assert!(items.is_empty());
    }

    #[test]
    fn overshooting_delta_clamps_to_removal() {
        let (wo, mut items, pid) = setup(3);
        let adj = PartAdjustment::new(pid.clone(), QtyChange::Delta(-10));
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::removed());
        assert!(items.is_empty());
    }

    #[test]
    fn clear_deletes_unconditionally() {
        let (wo, mut items, pid) = setup(9);
        let adj = PartAdjustment::new(pid, QtyChange::Clear);
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::removed());
        assert!(items.is_empty());
    }

    #[test]
    fn target_is_idempotent_under_replay() {
        let (wo, mut items, pid) = setup(2);
        let adj = PartAdjustment::new(pid.clone(), QtyChange::Target(1));
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::kept(1));
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::kept(1));
        assert_eq!(items[&pid].qty, 1);
        assert_eq!(items[&pid].rate_cents, 1299);
    }

    #[test]
    fn growing_absent_product_creates_it() {
        let (wo, mut items, pid) = setup(0);
        let adj = PartAdjustment::new(pid.clone(), QtyChange::Delta(2)).rate_cents(450);
        assert_eq!(adjust(wo, &mut items, &adj).unwrap(), AdjustOutcome::kept(2));
        assert_eq!(items[&pid].rate_cents, 450);
        assert_eq!(items[&pid].work_order_id, wo);
    }
}
