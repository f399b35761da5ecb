//! Volatility analyzer (C3): Bollinger Bands and dynamic base spacing.
//!
//! Computed as a batch over a window of candle closes fetched fresh each
//! pass rather than updated incrementally, since the engine polls and
//! reconciles rather than streaming candles across passes.

use crate::venue::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub sma: f64,
    pub sigma: f64,
    pub upper: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn bandwidth(&self) -> f64 {
        if self.sma == 0.0 {
            0.0
        } else {
            (self.upper - self.lower) / self.sma
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insufficient;

/// Compute SMA / sample stddev / bands over `closes`. Requires at least
/// `period` samples; the caller passes exactly `period` closes (the most
/// recent `period` candles).
pub fn bollinger_bands(closes: &[f64], period: usize) -> Result<BollingerBands, Insufficient> {
    if closes.len() < period || period < 2 {
        return Err(Insufficient);
    }
    let window = &closes[closes.len() - period..];
    let n = window.len() as f64;
    let sma = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|c| (c - sma).powi(2)).sum::<f64>() / (n - 1.0);
    let sigma = variance.sqrt();
    let upper = sma + 2.0 * sigma;
    let lower = sma - 2.0 * sigma;
    Ok(BollingerBands { sma, sigma, upper, lower })
}

pub struct SpacingParams {
    pub multiplier: f64,
    pub min_abs: f64,
    pub min_pct: f64,
    pub fallback_pct: f64,
}

impl Default for SpacingParams {
    fn default() -> Self {
        Self {
            multiplier: 0.3,
            min_abs: 1e-4,
            min_pct: 0.003,
            fallback_pct: 0.007,
        }
    }
}

/// Dynamic base spacing from the last `K` 4h candles' relative amplitude.
/// Any missing/short candle set falls back to `fallback_pct * last_close`.
pub fn dynamic_base_spacing(candles: &[Candle], last_close: f64, params: &SpacingParams) -> f64 {
    const K: usize = 3;
    if candles.len() < K || last_close <= 0.0 {
        return params.fallback_pct * last_close;
    }
    let recent = &candles[candles.len() - K..];
    let avg_amplitude: f64 = recent
        .iter()
        .map(|c| {
            if c.low > 0.0 {
                (c.high - c.low) / c.low
            } else {
                0.0
            }
        })
        .sum::<f64>()
        / K as f64;

    let by_amplitude = avg_amplitude * params.multiplier * last_close;
    let by_pct = last_close * params.min_pct;
    by_amplitude.max(params.min_abs).max(by_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(h: f64, l: f64) -> Candle {
        Candle { ts: 0, open: (h + l) / 2.0, high: h, low: l, close: (h + l) / 2.0, volume: 0.0 }
    }

    #[test]
    fn insufficient_when_short() {
        assert!(bollinger_bands(&[1.0, 2.0], 5).is_err());
    }

    #[test]
    fn bands_straddle_sma() {
        let closes = vec![100.0, 101.0, 99.0, 100.5, 99.5, 100.0, 101.5, 98.5, 100.2, 99.8];
        let bb = bollinger_bands(&closes, 10).unwrap();
        assert!(bb.upper > bb.sma);
        assert!(bb.sma > bb.lower);
        assert!(bb.bandwidth() > 0.0);
    }

    #[test]
    fn dynamic_spacing_uses_recent_amplitude() {
        let candles = vec![candle(101.0, 99.0), candle(102.0, 98.0), candle(103.0, 97.0)];
        let s = dynamic_base_spacing(&candles, 100.0, &SpacingParams::default());
        assert!(s > 0.0);
    }

    #[test]
    fn dynamic_spacing_falls_back_when_insufficient() {
        let s = dynamic_base_spacing(&[], 100.0, &SpacingParams::default());
        assert!((s - 0.7).abs() < 1e-9);
    }
}
