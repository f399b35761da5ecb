//! Price and quantity rounding (C2).
//!
//! `round_to_tick`/`round_to_step` bias away from the exact boundary by a
//! small epsilon so two adjacent grid levels never collapse onto the same
//! tick.

const EPSILON: f64 = 1e-6;

pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    round_with_epsilon(price, tick)
}

pub fn round_to_step(qty: f64, step: f64) -> f64 {
    round_with_epsilon(qty, step)
}

fn round_with_epsilon(value: f64, quantum: f64) -> f64 {
    if quantum <= 0.0 {
        return value;
    }
    let steps = ((value + EPSILON) / quantum).round();
    steps * quantum
}

/// True if `value` is an integer multiple of `quantum`, within float slop.
pub fn is_aligned(value: f64, quantum: f64) -> bool {
    if quantum <= 0.0 {
        return true;
    }
    let remainder = (value / quantum) - (value / quantum).round();
    remainder.abs() < 1e-6
}
