//! Grid Planner (C6): given a reference price, spacing rule, and level
//! count, emits the ordered set of intended orders for one of the grid
//! modes.

use crate::config::{Mode, Side};
use crate::rounding::{round_to_step, round_to_tick};
use crate::venue::OrderKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedOrder {
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price for LIMIT orders, trigger price for STOP_MARKET.
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GridPlanInput {
    pub ref_price: f64,
    pub levels: u32,
    pub base_spacing: f64,
    pub progression: f64,
    pub progressive: bool,
    pub tick: f64,
    pub step: f64,
    pub quantity: f64,
    pub mode: Mode,
    pub bollinger_bounded: bool,
    /// (upper, lower, sma) from the Volatility Analyzer; required when
    /// `bollinger_bounded` is set.
    pub bollinger: Option<(f64, f64, f64)>,
}

/// One level's cumulative offset from the reference price and its scaled
/// quantity. `r=1.0` (non-progressive) degenerates cleanly into the
/// uniform-spacing case: cumulative offset of N identical steps is `N*s`.
fn level_offsets(input: &GridPlanInput) -> Vec<(f64, f64)> {
    let r = if input.progressive { input.progression } else { 1.0 };
    let mut cum = 0.0;
    let mut out = Vec::with_capacity(input.levels as usize);
    for i in 0..input.levels {
        let spacing_i = input.base_spacing * r.powi(i as i32);
        cum += spacing_i;
        let qty_i = input.quantity * r.powi(i as i32);
        out.push((cum, qty_i));
    }
    out
}

fn plan_neutral_even(input: &GridPlanInput) -> Vec<PlannedOrder> {
    level_offsets(input)
        .into_iter()
        .flat_map(|(offset, qty)| {
            let quantity = round_to_step(qty, input.step);
            let buy = PlannedOrder {
                side: Side::Buy,
                kind: OrderKind::Limit,
                price: round_to_tick(input.ref_price - offset, input.tick),
                quantity,
            };
            let sell = PlannedOrder {
                side: Side::Sell,
                kind: OrderKind::Limit,
                price: round_to_tick(input.ref_price + offset, input.tick),
                quantity,
            };
            [buy, sell]
        })
        .collect()
}

/// Bollinger-bounded layout: walk outward from `ref_price` in steps of
/// `base_spacing`, skipping any candidate that does not clear the
/// reference price after rounding, until `levels` distinct SELLs and
/// `levels` distinct BUYs have been placed. Bands are advisory only —
/// levels are not clipped to them (see DESIGN.md).
fn plan_neutral_bollinger(input: &GridPlanInput) -> Vec<PlannedOrder> {
    let Some((upper, lower, sma)) = input.bollinger else {
        return Vec::new();
    };
    let _ = (upper, lower); // advisory only, see DESIGN.md
    if (input.ref_price - sma).abs() > input.base_spacing {
        return Vec::new();
    }

    let quantity = round_to_step(input.quantity, input.step);
    let ref_tick = round_to_tick(input.ref_price, input.tick);
    let mut out = Vec::with_capacity(2 * input.levels as usize);

    let mut sells_placed = 0u32;
    let mut j = 1u32;
    while sells_placed < input.levels {
        let candidate = round_to_tick(input.ref_price + j as f64 * input.base_spacing, input.tick);
        if candidate > ref_tick {
            out.push(PlannedOrder { side: Side::Sell, kind: OrderKind::Limit, price: candidate, quantity });
            sells_placed += 1;
        }
        j += 1;
    }

    let mut buys_placed = 0u32;
    let mut j = 1u32;
    while buys_placed < input.levels {
        let candidate = round_to_tick(input.ref_price - j as f64 * input.base_spacing, input.tick);
        if candidate < ref_tick {
            out.push(PlannedOrder { side: Side::Buy, kind: OrderKind::Limit, price: candidate, quantity });
            buys_placed += 1;
        }
        j += 1;
    }

    out
}

/// LONG creation places, per level, an ascending stop-market BUY trigger
/// paired with a limit SELL `levels * base_spacing` above that trigger
/// (the "N*s above the buy trigger" bracket from the specification).
/// Progression does not apply to LONG/SHORT — only NEUTRAL spaces
/// geometrically.
fn plan_long(input: &GridPlanInput) -> Vec<PlannedOrder> {
    let quantity = round_to_step(input.quantity, input.step);
    let total_offset = input.levels as f64 * input.base_spacing;
    let mut out = Vec::with_capacity(2 * input.levels as usize);
    for level in 1..=input.levels {
        let buy_price = round_to_tick(input.ref_price + level as f64 * input.base_spacing, input.tick);
        let sell_price = round_to_tick(buy_price + total_offset, input.tick);
        out.push(PlannedOrder { side: Side::Buy, kind: OrderKind::StopMarket, price: buy_price, quantity });
        out.push(PlannedOrder { side: Side::Sell, kind: OrderKind::Limit, price: sell_price, quantity });
    }
    out
}

/// Mirror of `plan_long` below the market: descending stop-market SELL
/// triggers paired with a limit BUY `levels * base_spacing` below each
/// trigger.
fn plan_short(input: &GridPlanInput) -> Vec<PlannedOrder> {
    let quantity = round_to_step(input.quantity, input.step);
    let total_offset = input.levels as f64 * input.base_spacing;
    let mut out = Vec::with_capacity(2 * input.levels as usize);
    for level in 1..=input.levels {
        let sell_price = round_to_tick(input.ref_price - level as f64 * input.base_spacing, input.tick);
        let buy_price = round_to_tick(sell_price - total_offset, input.tick);
        out.push(PlannedOrder { side: Side::Sell, kind: OrderKind::StopMarket, price: sell_price, quantity });
        out.push(PlannedOrder { side: Side::Buy, kind: OrderKind::Limit, price: buy_price, quantity });
    }
    out
}

pub fn plan(input: &GridPlanInput) -> Vec<PlannedOrder> {
    match input.mode {
        Mode::Neutral if input.bollinger_bounded => plan_neutral_bollinger(input),
        Mode::Neutral => plan_neutral_even(input),
        Mode::Long => plan_long(input),
        Mode::Short => plan_short(input),
    }
}

/// The order kind a replacement counter-order should take. NEUTRAL always
/// replaces with a resting LIMIT; LONG/SHORT alternate between a LIMIT
/// take-profit and a STOP_MARKET re-entry trigger as the position flips
/// sides: a buy fill transitions to a SELL limit, a sell fill transitions
/// to a new BUY stop.
pub fn counter_order_kind(mode: Mode, counter_side: Side) -> OrderKind {
    match (mode, counter_side) {
        (Mode::Neutral, _) => OrderKind::Limit,
        (Mode::Long, Side::Buy) => OrderKind::StopMarket,
        (Mode::Long, Side::Sell) => OrderKind::Limit,
        (Mode::Short, Side::Sell) => OrderKind::StopMarket,
        (Mode::Short, Side::Buy) => OrderKind::Limit,
    }
}
