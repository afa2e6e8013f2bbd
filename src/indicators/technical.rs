// =============================================================================
// Technical Indicator Engine
// =============================================================================
//
// Owns the per-token bar ring (`BarRing`) plus a TTL-cached derived
// indicators snapshot per token. `compute_technical_indicators` is the pure
// core: given a bar history and the current price it deterministically
// produces a `TechnicalIndicators` value (§8 "indicator purity" law) — the
// TTL caching layer around it is a performance concern, not a correctness
// one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::indicators::atr::calculate_atr_pct;
use crate::indicators::bar::{BarRing, PriceBar};
use crate::indicators::ema::calculate_ema;
use crate::indicators::macd::calculate_macd_line;
use crate::indicators::rsi::calculate_rsi;
use crate::ttl_cache::TtlCache;
use crate::types::{EmaCrossover, EmaTrendAlignment, RsiDivergence, TokenKey, VolumeTrend};

const MIN_BARS_FOR_INDICATORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi14: f64,
    pub ema9: f64,
    pub ema21: f64,
    pub ema50: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub atr14: f64,
    pub atr_percent: f64,
    pub ema_trend_alignment: EmaTrendAlignment,
    pub ema_crossover: EmaCrossover,
    pub rsi_divergence: RsiDivergence,
    pub price_vs_ema9: f64,
    pub price_vs_ema21: f64,
    pub price_vs_ema50: f64,
    pub is_overextended: bool,
    pub is_pullback: bool,
    pub trend_strength: f64,
    pub volume_trend: VolumeTrend,
}

impl TechnicalIndicators {
    /// Returned when bar history is too short to compute anything
    /// meaningful (§3: "bars < 10 bars" boundary behavior).
    pub fn defaults() -> Self {
        Self {
            rsi14: 50.0,
            ema9: 0.0,
            ema21: 0.0,
            ema50: 0.0,
            macd_line: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            atr14: 0.0,
            atr_percent: 0.0,
            ema_trend_alignment: EmaTrendAlignment::Mixed,
            ema_crossover: EmaCrossover::None,
            rsi_divergence: RsiDivergence::None,
            price_vs_ema9: 0.0,
            price_vs_ema21: 0.0,
            price_vs_ema50: 0.0,
            is_overextended: false,
            is_pullback: false,
            trend_strength: 50.0,
            volume_trend: VolumeTrend::Stable,
        }
    }
}

fn round_to(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

/// Pure computation: given bar history (oldest first) and the current
/// live price, produce the derived indicators. Deterministic for a fixed
/// input (§8 indicator purity law).
pub fn compute_technical_indicators(bars: &[PriceBar], current_price: f64) -> TechnicalIndicators {
    if bars.len() < MIN_BARS_FOR_INDICATORS {
        return TechnicalIndicators::defaults();
    }

    let mut closes: Vec<f64> = bars.iter().map(|b| b.c).collect();
    if closes.last().copied() != Some(current_price) {
        closes.push(current_price);
    }

    // --- RSI(14), Wilder's smoothing -----------------------------------
    let rsi_series = calculate_rsi(&closes, 14);
    let rsi14 = rsi_series.last().copied().unwrap_or(50.0);

    // --- EMAs over 9 / 21 / min(50, N) ----------------------------------
    let ema9_series = calculate_ema(&closes, 9);
    let ema21_series = calculate_ema(&closes, 21);
    let ema50_period = closes.len().min(50);
    let ema50_series = calculate_ema(&closes, ema50_period.max(1));

    let ema9 = ema9_series.last().copied().unwrap_or(current_price);
    let ema21 = ema21_series.last().copied().unwrap_or(current_price);
    let ema50 = ema50_series.last().copied().unwrap_or(current_price);

    // --- MACD ------------------------------------------------------------
    let macd_line_series = calculate_macd_line(&closes);
    let (macd_line, macd_signal, macd_histogram) = if macd_line_series.len() >= 9 {
        let signal_series = calculate_ema(&macd_line_series, 9);
        let line = *macd_line_series.last().unwrap();
        let signal = signal_series.last().copied().unwrap_or(line);
        (line, signal, line - signal)
    } else {
        (0.0, 0.0, 0.0)
    };

    // --- ATR(14), computed on closed bars only --------------------------
    let atr14 = calculate_atr_pct(bars, 14).map(|pct| pct / 100.0 * current_price);
    let atr14 = atr14.unwrap_or(0.0);
    let atr_percent = if current_price > 0.0 {
        atr14 / current_price * 100.0
    } else {
        0.0
    };

    // --- EMA trend alignment ---------------------------------------------
    let ema_trend_alignment = if current_price > ema9 && ema9 > ema21 && ema21 > ema50 {
        EmaTrendAlignment::Bullish
    } else if current_price < ema9 && ema9 < ema21 && ema21 < ema50 {
        EmaTrendAlignment::Bearish
    } else {
        EmaTrendAlignment::Mixed
    };

    // --- EMA crossover: compare 3-bars-ago ordering to current -----------
    let ema_crossover = ema_crossover_from_series(&ema9_series, &ema21_series);

    // --- RSI divergence ----------------------------------------------------
    let rsi_divergence = rsi_divergence_from_series(&closes, &rsi_series);

    // --- Price vs EMA percent deltas --------------------------------------
    let price_vs_ema9 = pct_delta(current_price, ema9);
    let price_vs_ema21 = pct_delta(current_price, ema21);
    let price_vs_ema50 = pct_delta(current_price, ema50);

    // --- Overextended / pullback flags ------------------------------------
    let is_overextended =
        price_vs_ema21 > 15.0 || rsi14 > 80.0 || (price_vs_ema9 > 8.0 && rsi14 > 70.0);
    let is_pullback = ema_trend_alignment == EmaTrendAlignment::Bullish
        && rsi14 > 25.0
        && rsi14 < 45.0
        && price_vs_ema21 > -5.0
        && price_vs_ema21 < 3.0
        && current_price > ema50;

    // --- Trend strength -----------------------------------------------------
    let trend_strength = trend_strength_score(
        ema_trend_alignment,
        macd_histogram,
        current_price,
        rsi14,
        ema_crossover,
    );

    // --- Volume trend ---------------------------------------------------
    let volume_trend = volume_trend_from_bars(bars);

    TechnicalIndicators {
        rsi14: round_to(rsi14, 0.1),
        ema9,
        ema21,
        ema50,
        macd_line: round_to(macd_line, 1e-8),
        macd_signal: round_to(macd_signal, 1e-8),
        macd_histogram: round_to(macd_histogram, 1e-8),
        atr14,
        atr_percent,
        ema_trend_alignment,
        ema_crossover,
        rsi_divergence,
        price_vs_ema9: round_to(price_vs_ema9, 0.01),
        price_vs_ema21: round_to(price_vs_ema21, 0.01),
        price_vs_ema50: round_to(price_vs_ema50, 0.01),
        is_overextended,
        is_pullback,
        trend_strength: trend_strength.round(),
        volume_trend,
    }
}

fn pct_delta(price: f64, ema: f64) -> f64 {
    if ema == 0.0 {
        return 0.0;
    }
    (price - ema) / ema * 100.0
}

fn ema_crossover_from_series(ema9: &[f64], ema21: &[f64]) -> EmaCrossover {
    if ema9.len() < 3 || ema21.len() < 3 {
        return EmaCrossover::None;
    }
    let n9 = ema9.len();
    let n21 = ema21.len();

    let prior_9 = ema9[n9 - 3];
    let prior_21 = ema21[n21 - 3];
    let now_9 = ema9[n9 - 1];
    let now_21 = ema21[n21 - 1];

    let was_below = prior_9 <= prior_21;
    let was_above = prior_9 >= prior_21;
    let now_above = now_9 > now_21;
    let now_below = now_9 < now_21;

    if was_below && now_above {
        EmaCrossover::GoldenCross
    } else if was_above && now_below {
        EmaCrossover::DeathCross
    } else {
        EmaCrossover::None
    }
}

fn rsi_divergence_from_series(closes: &[f64], rsi_series: &[f64]) -> RsiDivergence {
    let n = rsi_series.len();
    if n < 20 {
        return RsiDivergence::None;
    }
    let prices = &closes[closes.len() - n..];

    let last10_price = &prices[n - 10..];
    let prev10_price = &prices[n - 20..n - 10];
    let last10_rsi = &rsi_series[n - 10..];
    let prev10_rsi = &rsi_series[n - 20..n - 10];

    let min = |s: &[f64]| s.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = |s: &[f64]| s.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let lower_low_price = min(last10_price) < min(prev10_price);
    let higher_low_rsi = min(last10_rsi) > min(prev10_rsi);
    if lower_low_price && higher_low_rsi {
        return RsiDivergence::Bullish;
    }

    let higher_high_price = max(last10_price) > max(prev10_price);
    let lower_high_rsi = max(last10_rsi) < max(prev10_rsi);
    if higher_high_price && lower_high_rsi {
        return RsiDivergence::Bearish;
    }

    RsiDivergence::None
}

fn trend_strength_score(
    alignment: EmaTrendAlignment,
    macd_histogram: f64,
    price: f64,
    rsi14: f64,
    crossover: EmaCrossover,
) -> f64 {
    let mut score = 50.0;

    score += match alignment {
        EmaTrendAlignment::Bullish => 15.0,
        EmaTrendAlignment::Bearish => -15.0,
        EmaTrendAlignment::Mixed => 0.0,
    };

    let macd_shift = if price.abs() > 1e-12 {
        (macd_histogram / price * 10_000.0).clamp(-10.0, 10.0)
    } else {
        0.0
    };
    score += macd_shift;

    let rsi_shift = ((rsi14 - 50.0) / 50.0 * 10.0).clamp(-10.0, 10.0);
    score += rsi_shift;

    score += match crossover {
        EmaCrossover::GoldenCross => 8.0,
        EmaCrossover::DeathCross => -8.0,
        EmaCrossover::None => 0.0,
    };

    score.clamp(0.0, 100.0)
}

fn volume_trend_from_bars(bars: &[PriceBar]) -> VolumeTrend {
    if bars.len() < 10 {
        return VolumeTrend::Stable;
    }
    let n = bars.len();
    let last5: f64 = bars[n - 5..].iter().map(|b| b.v).sum::<f64>() / 5.0;
    let prev5: f64 = bars[n - 10..n - 5].iter().map(|b| b.v).sum::<f64>() / 5.0;

    if prev5 <= 0.0 {
        return VolumeTrend::Stable;
    }
    let change = (last5 - prev5) / prev5;
    if change > 0.3 {
        VolumeTrend::Increasing
    } else if change < -0.3 {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Stable
    }
}

// -----------------------------------------------------------------------
// Engine: bar ring + TTL-cached derived indicators, keyed by TokenKey
// -----------------------------------------------------------------------

pub struct TechnicalIndicatorEngine {
    pub bars: BarRing,
    cache: TtlCache<TokenKey, TechnicalIndicators>,
}

impl TechnicalIndicatorEngine {
    pub fn new(bar_history_max: usize, indicator_cache_ttl: Duration) -> Self {
        Self {
            bars: BarRing::new(bar_history_max),
            cache: TtlCache::new(indicator_cache_ttl),
        }
    }

    pub fn update_price_history(
        &self,
        key: &TokenKey,
        now_ms: i64,
        price: f64,
        volume: f64,
        high: Option<f64>,
        low: Option<f64>,
    ) {
        self.bars.update_price_history(key, now_ms, price, volume, high, low);
    }

    pub fn ingest_ohlcv(&self, key: &TokenKey, candles: &[PriceBar]) {
        self.bars.ingest_ohlcv(key, candles);
    }

    /// Cached per §3 ("derived, cached ≤45s"). A cache miss recomputes
    /// from the current bar history.
    pub fn compute_technical_indicators(
        &self,
        key: &TokenKey,
        current_price: f64,
    ) -> TechnicalIndicators {
        if let Some(cached) = self.cache.get(key) {
            return cached;
        }
        let bars = self.bars.bars(key);
        let indicators = compute_technical_indicators(&bars, current_price);
        self.cache.insert(key.clone(), indicators);
        indicators
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;

    fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                t: i as i64 * 60_000,
                o: c,
                h: c * 1.01,
                l: c * 0.99,
                c,
                v: 1000.0,
            })
            .collect()
    }

    #[test]
    fn fewer_than_ten_bars_returns_defaults() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        let ind = compute_technical_indicators(&bars, 3.0);
        assert_eq!(ind, TechnicalIndicators::defaults());
    }

    #[test]
    fn ascending_series_is_bullish_aligned() {
        let closes: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let bars = bars_from_closes(&closes);
        let ind = compute_technical_indicators(&bars, 81.0);
        assert_eq!(ind.ema_trend_alignment, EmaTrendAlignment::Bullish);
        assert!(ind.rsi14 > 50.0);
        assert!((0.0..=100.0).contains(&ind.trend_strength));
    }

    #[test]
    fn descending_series_is_bearish_aligned() {
        let closes: Vec<f64> = (1..=80).rev().map(|x| x as f64).collect();
        let bars = bars_from_closes(&closes);
        let ind = compute_technical_indicators(&bars, 0.5);
        assert_eq!(ind.ema_trend_alignment, EmaTrendAlignment::Bearish);
        assert!(ind.rsi14 < 50.0);
    }

    #[test]
    fn overextended_flag_trips_on_high_rsi() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64 * 1.05).collect();
        let bars = bars_from_closes(&closes);
        let ind = compute_technical_indicators(&bars, closes.last().unwrap() * 1.3);
        assert!(ind.is_overextended);
    }

    #[test]
    fn engine_caches_within_ttl() {
        let key = TokenKey::new(Chain::Solana, "Mint1");
        let engine = TechnicalIndicatorEngine::new(200, Duration::from_secs(45));
        for i in 0..30 {
            engine.update_price_history(&key, i * 60_000, 10.0 + i as f64, 5.0, None, None);
        }
        let first = engine.compute_technical_indicators(&key, 40.0);
        let second = engine.compute_technical_indicators(&key, 999.0);
        // Still reads the cached value computed against price 40.0.
        assert_eq!(first, second);
    }
}
