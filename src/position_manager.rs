// =============================================================================
// Position Manager — exit policies (§4.5)
// =============================================================================
//
// Pure evaluation: given an open position and its current `TokenSignal`,
// decide what (if anything) to sell this cycle. Priority order matters —
// the first rule that fires wins. The caller (Agent Runner) is responsible
// for applying the resulting plan: persisting the trade, updating or
// closing the position, and notifying the learning store and tracker.

use chrono::{DateTime, Utc};

use crate::entities::AgentPosition;
use crate::signal_builder::TokenSignal;
use crate::types::{EmaCrossover, EmaTrendAlignment, MarketRegime, RsiDivergence, SignalTag, Strategy, WhaleActivity};

#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    /// Fraction of the *current* remaining size to sell, in `(0, 1]`.
    pub sell_fraction: f64,
    pub reason: &'static str,
    pub increment_tier: bool,
}

impl ExitPlan {
    fn full(reason: &'static str) -> Self {
        Self { sell_fraction: 1.0, reason, increment_tier: false }
    }
    fn partial(sell_fraction: f64, reason: &'static str) -> Self {
        Self { sell_fraction, reason, increment_tier: false }
    }
    fn tier(sell_fraction: f64) -> Self {
        Self { sell_fraction, reason: "tiered_profit_take", increment_tier: true }
    }

    pub fn is_full_close(&self) -> bool {
        self.sell_fraction >= 0.95
    }
}

fn max_hold_hours(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Conservative => 48.0,
        Strategy::Balanced => 36.0,
        Strategy::Aggressive => 18.0,
        Strategy::Degen => 10.0,
    }
}

fn breakeven_threshold_pct(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Conservative => 5.0,
        Strategy::Balanced => 8.0,
        Strategy::Aggressive => 12.0,
        Strategy::Degen => 18.0,
    }
}

fn trailing_k(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Conservative => 1.8,
        Strategy::Balanced => 2.2,
        Strategy::Aggressive => 2.8,
        Strategy::Degen => 3.5,
    }
}

/// `(fraction_of_TP, sellPct)` per strategy. The final entry is always
/// treated as a canonical full close rather than literally selling its
/// listed percentage, per the resolved tier/take-profit conflict.
fn tier_table(strategy: Strategy) -> [(f64, f64); 4] {
    match strategy {
        Strategy::Conservative => [(0.30, 30.0), (0.55, 25.0), (0.80, 25.0), (1.0, 20.0)],
        Strategy::Balanced => [(0.25, 25.0), (0.50, 25.0), (0.75, 25.0), (1.0, 25.0)],
        Strategy::Aggressive => [(0.20, 20.0), (0.45, 25.0), (0.70, 25.0), (1.0, 30.0)],
        Strategy::Degen => [(0.15, 15.0), (0.35, 20.0), (0.60, 25.0), (1.0, 40.0)],
    }
}

pub fn max_positions(strategy: Strategy) -> usize {
    match strategy {
        Strategy::Conservative => 3,
        Strategy::Balanced => 5,
        Strategy::Aggressive => 8,
        Strategy::Degen => 10,
    }
}

pub fn rug_risk_cap(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Conservative => 70.0,
        Strategy::Balanced => 60.0,
        Strategy::Aggressive => 45.0,
        Strategy::Degen => 45.0,
    }
}

/// Additive reversal-severity rubric (§4.5 rule 4). Shared by the exit
/// pipeline and the post-oracle hard-filter gate, which blocks new buys
/// into a token already showing severity ≥40.
pub fn momentum_reversal_score(signal: &TokenSignal) -> f64 {
    let mut score = 0.0_f64;
    if signal.technicals.rsi_divergence == RsiDivergence::Bearish {
        score += 30.0;
    }
    if signal.technicals.ema_crossover == EmaCrossover::DeathCross {
        score += 35.0;
    }
    if signal.technicals.macd_line < 0.0 && signal.technicals.macd_line < signal.technicals.macd_signal {
        score += 20.0;
    }
    if signal.has_tag(SignalTag::MomentumDecelerating) {
        score += 15.0;
    }
    if signal.short_term_momentum < 30.0 {
        score += 15.0;
    }
    if signal.technicals.ema_trend_alignment == EmaTrendAlignment::Bearish {
        score += 20.0;
    }
    if signal.whale_activity == WhaleActivity::Distributing {
        score += 25.0;
    }
    if signal.buy_pressure_score < 40.0 {
        score += 10.0;
    }
    score
}

fn held_hours(opened_at: &str, now: DateTime<Utc>) -> f64 {
    let opened = DateTime::parse_from_rfc3339(opened_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    (now - opened).num_milliseconds() as f64 / 3_600_000.0
}

/// §4.5: evaluates the priority-ordered exit rules against one position.
/// Returns `None` if nothing triggers this cycle.
pub fn evaluate_exit(
    position: &AgentPosition,
    signal: &TokenSignal,
    strategy: Strategy,
    regime: MarketRegime,
    now: DateTime<Utc>,
) -> Option<ExitPlan> {
    let pnl_percent = position.pnl_percent();
    let dynamic_stop_loss = signal.dynamic_stop_loss;
    let dynamic_take_profit = signal.dynamic_take_profit;

    // 1. Stop loss
    if pnl_percent <= -dynamic_stop_loss {
        return Some(ExitPlan::full("stop_loss_triggered"));
    }

    // 2. Trailing stop
    if let Some(trailing) = trailing_stop_price(position, signal, strategy, regime) {
        if position.current_price <= trailing {
            return Some(ExitPlan::full("trailing_stop_triggered"));
        }
    }

    // 3. Breakeven stop
    let peak_pnl_percent = if position.avg_entry_price > 0.0 {
        (position.highest_price - position.avg_entry_price) / position.avg_entry_price * 100.0
    } else {
        0.0
    };
    let breakeven_t = breakeven_threshold_pct(strategy);
    if peak_pnl_percent >= breakeven_t {
        let giveback = if peak_pnl_percent > 0.0 {
            (peak_pnl_percent - pnl_percent) / peak_pnl_percent
        } else {
            0.0
        };
        if giveback >= 0.60 && pnl_percent <= 1.0 {
            return Some(ExitPlan::full("breakeven_giveback"));
        }
    }

    // 4. Momentum reversal
    let reversal_score = momentum_reversal_score(signal);
    if reversal_score >= 60.0 && pnl_percent > -3.0 {
        return Some(ExitPlan::full_or_partial(reversal_score, "momentum_reversal"));
    }

    // 5. Time decay
    let held = held_hours(&position.opened_at, now);
    let max_hold = max_hold_hours(strategy);
    let half_max = max_hold / 2.0;
    if held >= half_max {
        let progress = ((held - half_max) / half_max).clamp(0.0, 1.0);
        let threshold = 3.0 - 6.0 * progress;
        if pnl_percent < threshold {
            return Some(ExitPlan::full("time_decay"));
        }
    }

    // 6. Token-signal rules, in order, first match wins.
    if signal.has_tag(SignalTag::FlashCrash) {
        return Some(ExitPlan::full("flash_crash"));
    }
    if signal.whale_activity == WhaleActivity::Distributing && pnl_percent > -3.0 {
        return Some(ExitPlan::full("whale_distributing"));
    }
    if signal.rug_risk_score >= 65.0 && pnl_percent > -5.0 {
        return Some(ExitPlan::full("rug_risk_spike"));
    }
    if signal.buy_pressure_score <= 25.0 && pnl_percent > -3.0 {
        return Some(ExitPlan::full("sell_pressure_collapse"));
    }
    if let Some(plan) = tiered_profit_take(position, strategy, pnl_percent, dynamic_take_profit) {
        return Some(plan);
    }
    if pnl_percent >= dynamic_take_profit {
        return Some(ExitPlan::full("take_profit"));
    }
    if signal.momentum_score <= 25.0 && pnl_percent > 0.0 {
        return Some(ExitPlan::full("momentum_collapse"));
    }
    if signal.buy_pressure_score <= 35.0 && pnl_percent > -3.0 {
        return Some(ExitPlan::partial(0.80, "weak_buy_pressure"));
    }
    if signal.momentum_acceleration < -3.0 && signal.momentum_score < 40.0 {
        return Some(ExitPlan::full("momentum_decelerating"));
    }
    if signal.short_term_momentum < 20.0 && pnl_percent > 3.0 {
        return Some(ExitPlan::partial(0.60, "short_term_momentum_fade"));
    }
    if signal.has_tag(SignalTag::HeavySellPressure) && pnl_percent < 5.0 {
        return Some(ExitPlan::full("heavy_sell_pressure"));
    }
    if signal.technicals.ema_crossover == EmaCrossover::DeathCross && pnl_percent > -3.0 {
        return Some(ExitPlan::full("death_cross"));
    }
    if signal.technicals.rsi14 > 85.0 && pnl_percent > 10.0 {
        return Some(ExitPlan::partial(0.70, "rsi_overbought"));
    }
    if signal.technicals.rsi_divergence == RsiDivergence::Bearish && pnl_percent > 5.0 {
        return Some(ExitPlan::partial(0.60, "rsi_bearish_divergence"));
    }
    if signal.technicals.ema_trend_alignment == EmaTrendAlignment::Bearish && pnl_percent > 0.0 {
        return Some(ExitPlan::full("ema_trend_bearish"));
    }
    if signal.technicals.macd_line < 0.0 && signal.technicals.macd_histogram < 0.0 && pnl_percent > 3.0 {
        return Some(ExitPlan::partial(0.80, "macd_bearish"));
    }
    if signal.technicals.is_overextended && pnl_percent > 15.0 {
        return Some(ExitPlan::partial(0.50, "overextended"));
    }

    // 7. Stale
    if held > 72.0 && pnl_percent.abs() < 5.0 {
        return Some(ExitPlan::full("stale_no_movement"));
    }
    if held > 24.0 && pnl_percent.abs() < 2.0 {
        return Some(ExitPlan::partial(0.50, "stale_flat"));
    }

    None
}

impl ExitPlan {
    fn full_or_partial(score: f64, reason: &'static str) -> Self {
        if score >= 80.0 {
            Self::full(reason)
        } else {
            Self::partial(0.70, reason)
        }
    }
}

fn trailing_stop_price(
    position: &AgentPosition,
    signal: &TokenSignal,
    strategy: Strategy,
    regime: MarketRegime,
) -> Option<f64> {
    let pnl_percent = position.pnl_percent();
    let entry = position.avg_entry_price;
    if entry <= 0.0 {
        return None;
    }

    let mut candidates: Vec<f64> = Vec::new();

    if pnl_percent >= 3.0 && position.highest_price > entry && signal.technicals.atr_percent > 0.0 {
        let mut k = trailing_k(strategy);
        if regime == MarketRegime::Bear {
            k *= 0.8;
        }
        if pnl_percent > 30.0 {
            k *= 0.7;
        } else if pnl_percent > 15.0 {
            k *= 0.85;
        }
        let distance = position.highest_price * (signal.technicals.atr_percent / 100.0) * k;
        candidates.push(position.highest_price - distance);
    }

    if position.highest_price >= 1.05 * entry {
        let factor = if position.current_price > 1.15 * entry { 0.5 } else { 0.7 };
        let distance = entry * (signal.dynamic_stop_loss / 100.0) * factor;
        candidates.push(entry.max(position.highest_price) - distance);
    }

    candidates.into_iter().fold(None, |acc, v| match acc {
        None => Some(v),
        Some(prev) => Some(prev.max(v)),
    })
}

fn tiered_profit_take(
    position: &AgentPosition,
    strategy: Strategy,
    pnl_percent: f64,
    dynamic_take_profit: f64,
) -> Option<ExitPlan> {
    let tiers = tier_table(strategy);
    let next = position.tier_sells_executed as usize;
    if next >= tiers.len() {
        return None;
    }
    let (fraction, sell_pct) = tiers[next];
    let threshold = fraction * dynamic_take_profit;
    if pnl_percent < threshold {
        return None;
    }

    if next == tiers.len() - 1 {
        return Some(ExitPlan::full("take_profit_final_tier"));
    }

    let sell_fraction = sell_pct / 100.0;
    if 1.0 - sell_fraction < 0.05 {
        return Some(ExitPlan::full("tier_sell_would_leave_dust"));
    }
    Some(ExitPlan::tier(sell_fraction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::TechnicalIndicators;
    use crate::types::{Chain, LifecyclePhase, LiquidityFlow, NewsImpact, NewsSentiment, SmartMoneyFlow};

    fn base_position(entry: f64, current: f64, highest: f64, opened_hours_ago: f64) -> AgentPosition {
        let opened_at = (Utc::now() - chrono::Duration::milliseconds((opened_hours_ago * 3_600_000.0) as i64))
            .to_rfc3339();
        let mut p = AgentPosition::new("agent-1", Chain::Solana, "mint1", "FOO", entry, 1.0, entry * 0.9, entry * 1.2, opened_at);
        p.current_price = current;
        p.highest_price = highest;
        p
    }

    fn base_signal() -> TokenSignal {
        TokenSignal {
            chain: Chain::Solana,
            address: "mint1".into(),
            symbol: "FOO".into(),
            price: 1.0,
            change_1h: 0.0,
            change_24h: 0.0,
            volume_24h: 0.0,
            market_cap: 0.0,
            liquidity_usd: 0.0,
            holders: 0,
            buys: 0,
            sells: 0,
            safety_score: 50.0,
            trending: false,
            boosted: false,
            volume_breakout: false,
            liquidity_draining: false,
            liquidity_growing: false,
            whale_activity: WhaleActivity::Neutral,
            lifecycle_phase: LifecyclePhase::Growth,
            market_regime: MarketRegime::Neutral,
            smart_money_flow: SmartMoneyFlow::Neutral,
            news_sentiment: NewsSentiment::Neutral,
            news_impact: NewsImpact::None,
            liquidity_flow: LiquidityFlow::Neutral,
            momentum_score: 50.0,
            volume_score: 50.0,
            buy_pressure_score: 50.0,
            liquidity_score: 50.0,
            rug_risk_score: 10.0,
            smart_money_score: 50.0,
            conviction: 50.0,
            overall_signal_score: 50.0,
            volatility: 40.0,
            short_term_momentum: 50.0,
            social_sentiment_score: 50.0,
            news_score: 50.0,
            liquidity_health: 50.0,
            fear_greed_value: 50.0,
            momentum_acceleration: 0.0,
            dynamic_stop_loss: 8.0,
            dynamic_take_profit: 22.0,
            technicals: TechnicalIndicators::defaults(),
            signals: Vec::new(),
        }
    }

    #[test]
    fn stop_loss_fires_first() {
        let position = base_position(100.0, 91.0, 100.0, 1.0);
        let mut signal = base_signal();
        signal.dynamic_stop_loss = 8.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Balanced, MarketRegime::Neutral, Utc::now()).unwrap();
        assert_eq!(plan.reason, "stop_loss_triggered");
        assert!(plan.is_full_close());
    }

    #[test]
    fn take_profit_closes_fully() {
        let position = base_position(100.0, 123.0, 123.0, 1.0);
        let mut signal = base_signal();
        signal.dynamic_take_profit = 22.0;
        signal.dynamic_stop_loss = 8.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Conservative, MarketRegime::Neutral, Utc::now()).unwrap();
        assert!(plan.is_full_close());
    }

    #[test]
    fn tiered_sell_fires_before_final_take_profit() {
        let mut position = base_position(100.0, 112.0, 112.0, 1.0);
        position.tier_sells_executed = 0;
        let mut signal = base_signal();
        signal.dynamic_take_profit = 40.0;
        signal.dynamic_stop_loss = 8.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Balanced, MarketRegime::Neutral, Utc::now()).unwrap();
        assert_eq!(plan.reason, "tiered_profit_take");
        assert!(plan.increment_tier);
        assert!((plan.sell_fraction - 0.25).abs() < 1e-9);
    }

    #[test]
    fn final_tier_is_canonical_full_close() {
        let mut position = base_position(100.0, 140.0, 140.0, 1.0);
        position.tier_sells_executed = 3;
        let mut signal = base_signal();
        signal.dynamic_take_profit = 40.0;
        signal.dynamic_stop_loss = 8.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Balanced, MarketRegime::Neutral, Utc::now()).unwrap();
        assert_eq!(plan.reason, "take_profit_final_tier");
        assert!(plan.is_full_close());
    }

    #[test]
    fn death_cross_triggers_full_close_when_not_losing() {
        let position = base_position(100.0, 105.0, 110.0, 1.0);
        let mut signal = base_signal();
        signal.technicals.ema_crossover = EmaCrossover::DeathCross;
        signal.dynamic_stop_loss = 50.0;
        signal.dynamic_take_profit = 90.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Aggressive, MarketRegime::Neutral, Utc::now()).unwrap();
        assert_eq!(plan.reason, "death_cross");
    }

    #[test]
    fn stale_flat_position_half_closes() {
        let position = base_position(100.0, 100.5, 101.0, 30.0);
        let mut signal = base_signal();
        signal.dynamic_stop_loss = 50.0;
        signal.dynamic_take_profit = 90.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Balanced, MarketRegime::Neutral, Utc::now()).unwrap();
        assert_eq!(plan.reason, "stale_flat");
        assert!((plan.sell_fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn healthy_position_has_no_exit() {
        let position = base_position(100.0, 103.0, 104.0, 1.0);
        let mut signal = base_signal();
        signal.dynamic_stop_loss = 50.0;
        signal.dynamic_take_profit = 90.0;
        signal.momentum_score = 60.0;
        signal.buy_pressure_score = 60.0;
        signal.short_term_momentum = 60.0;
        let plan = evaluate_exit(&position, &signal, Strategy::Balanced, MarketRegime::Neutral, Utc::now());
        assert!(plan.is_none());
    }

    #[test]
    fn max_positions_matches_strategy_caps() {
        assert_eq!(max_positions(Strategy::Conservative), 3);
        assert_eq!(max_positions(Strategy::Balanced), 5);
        assert_eq!(max_positions(Strategy::Aggressive), 8);
        assert_eq!(max_positions(Strategy::Degen), 10);
    }
}
