//! Gate (C4): hysteretic BBW-based start/stop decision.

use crate::config::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Start,
    Stop,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateOutput {
    pub decision: GateDecision,
    pub active: bool,
    pub strategy: Strategy,
}

/// Evaluate the hysteresis gate: enter below `threshold / 2`, exit above
/// `threshold`, otherwise hold the prior state.
pub fn evaluate(bbw: f64, threshold: f64, prior_active: bool, breakout: Option<Strategy>) -> GateOutput {
    if !prior_active && bbw < threshold / 2.0 {
        return GateOutput { decision: GateDecision::Start, active: true, strategy: Strategy::Grid };
    }
    if prior_active && bbw > threshold {
        let strategy = breakout.unwrap_or(Strategy::None);
        return GateOutput { decision: GateDecision::Stop, active: false, strategy };
    }
    let strategy = if prior_active {
        Strategy::Grid
    } else {
        breakout.unwrap_or(Strategy::None)
    };
    GateOutput { decision: GateDecision::Continue, active: prior_active, strategy }
}
