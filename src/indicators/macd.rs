// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// line      = EMA(12) - EMA(26)          (aligned on the trailing edge)
// signal    = EMA(9) of the line series
// histogram = line - signal
//
// Built directly on `calculate_ema`: the two EMA series start at different
// offsets (12 vs 26 samples), so they are aligned on their trailing ends
// before subtracting.
// =============================================================================

use crate::indicators::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Full aligned MACD line series (one entry per close once EMA-26 exists).
pub fn calculate_macd_line(closes: &[f64]) -> Vec<f64> {
    let ema12 = calculate_ema(closes, 12);
    let ema26 = calculate_ema(closes, 26);
    if ema12.is_empty() || ema26.is_empty() {
        return Vec::new();
    }
    // ema12 has (closes.len() - 11) entries, ema26 has (closes.len() - 25).
    // Align on the trailing edge: drop the extra leading entries from ema12.
    let offset = ema12.len().saturating_sub(ema26.len());
    ema12[offset..]
        .iter()
        .zip(ema26.iter())
        .map(|(&fast, &slow)| fast - slow)
        .collect()
}

/// Current MACD line/signal/histogram, or `None` if there are not enough
/// closes to form EMA-26 and a 9-period signal line.
pub fn current_macd(closes: &[f64]) -> Option<MacdValue> {
    let line_series = calculate_macd_line(closes);
    if line_series.len() < 9 {
        return None;
    }
    let signal_series = calculate_ema(&line_series, 9);
    let signal = *signal_series.last()?;
    let line = *line_series.last()?;
    let histogram = line - signal;
    if !line.is_finite() || !signal.is_finite() || !histogram.is_finite() {
        return None;
    }
    Some(MacdValue { line, signal, histogram })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_returns_none() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(current_macd(&closes).is_none());
    }

    #[test]
    fn ascending_series_is_bullish() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let macd = current_macd(&closes).unwrap();
        assert!(macd.line > 0.0, "fast EMA should lead slow EMA upward");
    }

    #[test]
    fn descending_series_is_bearish() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let macd = current_macd(&closes).unwrap();
        assert!(macd.line < 0.0);
    }

    #[test]
    fn flat_series_converges_to_zero() {
        let closes = vec![100.0; 100];
        let macd = current_macd(&closes).unwrap();
        assert!(macd.line.abs() < 1e-6);
        assert!(macd.histogram.abs() < 1e-6);
    }
}
