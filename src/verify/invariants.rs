//! Grid-specific invariants: tick/step alignment, order-id distinctness,
//! single-breakout-per-symbol, and the reset postcondition.

use crate::orderbook::LocalOrderBook;
use crate::rounding::is_aligned;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub msg: String,
}

fn violation(msg: impl Into<String>) -> InvariantViolation {
    InvariantViolation { msg: msg.into() }
}

/// Every order price must sit on a tick and every quantity on a step.
pub fn assert_grid_alignment(book: &LocalOrderBook, tick: f64, step: f64) -> Result<(), InvariantViolation> {
    for order in &book.orders {
        if !is_aligned(order.price, tick) {
            return Err(violation(format!("order {} price {} not tick-aligned", order.order_id, order.price)));
        }
        if !is_aligned(order.quantity, step) {
            return Err(violation(format!("order {} quantity {} not step-aligned", order.order_id, order.quantity)));
        }
    }
    Ok(())
}

/// No two local records may share an order id.
pub fn assert_distinct_order_ids(book: &LocalOrderBook) -> Result<(), InvariantViolation> {
    let mut seen = std::collections::HashSet::new();
    for order in &book.orders {
        if !seen.insert(order.order_id) {
            return Err(violation(format!("duplicate order id {}", order.order_id)));
        }
    }
    Ok(())
}

/// A symbol may have at most one breakout direction recorded at a time.
pub fn assert_single_breakout<'a>(
    active: impl Iterator<Item = &'a str>,
    symbol: &str,
) -> Result<(), InvariantViolation> {
    let count = active.filter(|s| *s == symbol).count();
    if count > 1 {
        return Err(violation(format!("{symbol} has {count} concurrent breakout entries")));
    }
    Ok(())
}

/// After a reset, the persisted book must be fully empty.
pub fn assert_reset_postcondition(book: &LocalOrderBook) -> Result<(), InvariantViolation> {
    if !book.orders.is_empty() {
        return Err(violation("book not empty after reset"));
    }
    if book.limit_orders.lowest_buy.is_some() || book.limit_orders.highest_sell.is_some() {
        return Err(violation("envelope not cleared after reset"));
    }
    Ok(())
}

/// A replacement order must preserve the filled order's quantity.
pub fn assert_replacement_size_preserved(original_qty: f64, replacement_qty: f64) -> Result<(), InvariantViolation> {
    if (original_qty - replacement_qty).abs() > 1e-9 {
        return Err(violation(format!(
            "replacement qty {replacement_qty} does not match original {original_qty}"
        )));
    }
    Ok(())
}
