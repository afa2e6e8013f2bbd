// =============================================================================
// Signal Builder (§4.2)
// =============================================================================
//
// Merges live pair data, database/safety snapshots, smart-money, social,
// news, Fear & Greed, and liquidity signals into a ranked `TokenSignal`
// table. Three passes per cycle: (1) per-token merge/score, (2) market
// breadth -> regime classification, (3) regime-adaptive rescore.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::indicators::technical::TechnicalIndicatorEngine;
use crate::indicators::TechnicalIndicators;
use crate::market::{
    compute_liquidity_health_score, FearGreedSnapshot, FearGreedSource, LiquiditySnapshot,
    LiquiditySource, MarketFlowDirection, NewsSignal, NewsSource, OhlcvSource, PairSnapshot,
    PairSource, SmartMoneySignal, SmartMoneySource, SocialSignal, SocialSource,
};
use crate::types::{
    Chain, EmaCrossover, EmaTrendAlignment, LifecyclePhase, LiquidityFlow, MarketRegime,
    NewsImpact, NewsSentiment, RsiDivergence, SignalTag, SmartMoneyFlow, Strategy, VolumeTrend,
    WhaleActivity,
};

/// What the (out-of-scope) persistence/safety layer contributes per token
/// beyond what the pair source reports, per §4.2 "database token and
/// safety-report snapshots".
#[derive(Debug, Clone, Copy, Default)]
pub struct DbTokenSnapshot {
    pub holders: u32,
    pub dev_percent: f64,
    pub top_holder_percent: f64,
    pub safety_score: f64,
    pub trending: bool,
    pub boosted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenSignal {
    pub chain: Chain,
    pub address: String,
    pub symbol: String,
    pub price: f64,
    pub change_1h: f64,
    pub change_24h: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub liquidity_usd: f64,
    pub holders: u32,
    pub buys: u32,
    pub sells: u32,

    pub safety_score: f64,

    pub trending: bool,
    pub boosted: bool,
    pub volume_breakout: bool,
    pub liquidity_draining: bool,
    pub liquidity_growing: bool,

    pub whale_activity: WhaleActivity,
    pub lifecycle_phase: LifecyclePhase,
    pub market_regime: MarketRegime,
    pub smart_money_flow: SmartMoneyFlow,
    pub news_sentiment: NewsSentiment,
    pub news_impact: NewsImpact,
    pub liquidity_flow: LiquidityFlow,

    pub momentum_score: f64,
    pub volume_score: f64,
    pub buy_pressure_score: f64,
    pub liquidity_score: f64,
    pub rug_risk_score: f64,
    pub smart_money_score: f64,
    pub conviction: f64,
    pub overall_signal_score: f64,
    pub volatility: f64,
    pub short_term_momentum: f64,
    pub social_sentiment_score: f64,
    pub news_score: f64,
    pub liquidity_health: f64,
    pub fear_greed_value: f64,

    pub momentum_acceleration: f64,

    pub dynamic_stop_loss: f64,
    pub dynamic_take_profit: f64,

    pub technicals: TechnicalIndicators,

    pub signals: Vec<SignalTag>,
}

impl TokenSignal {
    pub fn has_tag(&self, tag: SignalTag) -> bool {
        self.signals.iter().any(|s| *s == tag)
    }

    pub fn signal_names(&self) -> Vec<String> {
        self.signals.iter().map(|s| s.as_str().to_string()).collect()
    }
}

// -----------------------------------------------------------------------
// Strategy-base dynamic SL/TP (§4.2 step 6)
// -----------------------------------------------------------------------

fn base_sl_tp(strategy: Strategy) -> (f64, f64) {
    match strategy {
        Strategy::Conservative => (8.0, 18.0),
        Strategy::Balanced => (12.0, 30.0),
        Strategy::Aggressive => (18.0, 50.0),
        Strategy::Degen => (25.0, 80.0),
    }
}

fn volatility_sl_multiplier(volatility: f64) -> f64 {
    if volatility >= 85.0 {
        1.6
    } else if volatility >= 70.0 {
        1.35
    } else if volatility >= 55.0 {
        1.15
    } else if volatility >= 40.0 {
        1.0
    } else {
        0.85
    }
}

fn regime_tp_multiplier(regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::Bull => 1.3,
        MarketRegime::Bear => 0.7,
        MarketRegime::Neutral => 1.0,
    }
}

fn compute_dynamic_sl_tp(strategy: Strategy, volatility: f64, regime: MarketRegime) -> (f64, f64) {
    let (base_sl, base_tp) = base_sl_tp(strategy);
    let vol_mult = volatility_sl_multiplier(volatility);
    let sl = base_sl * vol_mult;
    let tp = base_tp * vol_mult * regime_tp_multiplier(regime);
    (sl, tp)
}

// -----------------------------------------------------------------------
// Adaptive weights by regime (§4.2)
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct AdaptiveWeights {
    momentum: f64,
    volume: f64,
    buy_pressure: f64,
    liquidity: f64,
    safety: f64,
    smart_money: f64,
    anti_rug: f64,
    st_momentum: f64,
    trend: f64,
    social: f64,
}

fn adaptive_weights(regime: MarketRegime) -> AdaptiveWeights {
    match regime {
        MarketRegime::Bull => AdaptiveWeights {
            momentum: 0.17,
            volume: 0.12,
            buy_pressure: 0.10,
            liquidity: 0.05,
            safety: 0.05,
            smart_money: 0.12,
            anti_rug: 0.04,
            st_momentum: 0.05,
            trend: 0.12,
            social: 0.10,
        },
        MarketRegime::Bear => AdaptiveWeights {
            momentum: 0.11,
            volume: 0.09,
            buy_pressure: 0.12,
            liquidity: 0.10,
            safety: 0.11,
            smart_money: 0.10,
            anti_rug: 0.09,
            st_momentum: 0.04,
            trend: 0.09,
            social: 0.07,
        },
        MarketRegime::Neutral => AdaptiveWeights {
            momentum: 0.16,
            volume: 0.11,
            buy_pressure: 0.11,
            liquidity: 0.07,
            safety: 0.07,
            smart_money: 0.11,
            anti_rug: 0.05,
            st_momentum: 0.04,
            trend: 0.11,
            social: 0.09,
        },
    }
}

// -----------------------------------------------------------------------
// Market breadth (§4.2 second pass)
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketBreadth {
    pub breadth_score: f64,
    pub regime: Option<MarketRegime>,
    pub avg_momentum: f64,
    pub avg_buy_pressure: f64,
    pub pct_positive_1h: f64,
    pub avg_rsi: f64,
    pub avg_trend_strength: f64,
    pub pct_bullish_ema: f64,
    pub pct_bearish_ema: f64,
    pub pct_volume_trend_up: f64,
}

fn compute_market_breadth(signals: &[TokenSignal]) -> MarketBreadth {
    if signals.is_empty() {
        return MarketBreadth { breadth_score: 50.0, regime: Some(MarketRegime::Neutral), ..Default::default() };
    }
    let sample_size = signals.len().min(50);
    let sample = &signals[..sample_size];
    let n = sample.len() as f64;

    let avg_momentum = sample.iter().map(|s| s.momentum_score).sum::<f64>() / n;
    let avg_buy_pressure = sample.iter().map(|s| s.buy_pressure_score).sum::<f64>() / n;
    let pct_positive_1h = sample.iter().filter(|s| s.change_1h > 0.0).count() as f64 / n * 100.0;
    let avg_rsi = sample.iter().map(|s| s.technicals.rsi14).sum::<f64>() / n;
    let avg_trend_strength = sample.iter().map(|s| s.technicals.trend_strength).sum::<f64>() / n;
    let pct_bullish_ema = sample
        .iter()
        .filter(|s| s.technicals.ema_trend_alignment == EmaTrendAlignment::Bullish)
        .count() as f64
        / n
        * 100.0;
    let pct_bearish_ema = sample
        .iter()
        .filter(|s| s.technicals.ema_trend_alignment == EmaTrendAlignment::Bearish)
        .count() as f64
        / n
        * 100.0;
    let pct_volume_trend_up = sample
        .iter()
        .filter(|s| s.technicals.volume_trend == VolumeTrend::Increasing)
        .count() as f64
        / n
        * 100.0;

    let mut breadth_score = 50.0_f64;
    breadth_score += (avg_momentum - 50.0) * 0.3;
    breadth_score += (avg_buy_pressure - 50.0) * 0.2;
    breadth_score += (pct_positive_1h - 50.0) * 0.15;
    breadth_score += (avg_rsi - 50.0) * 0.15;
    breadth_score += (avg_trend_strength - 50.0) * 0.2;
    breadth_score += (pct_bullish_ema - pct_bearish_ema) * 0.1;
    breadth_score += (pct_volume_trend_up - 50.0) * 0.1;
    let breadth_score = breadth_score.clamp(0.0, 100.0);

    let regime = if breadth_score >= 68.0 {
        MarketRegime::Bull
    } else if breadth_score <= 32.0 {
        MarketRegime::Bear
    } else {
        MarketRegime::Neutral
    };

    MarketBreadth {
        breadth_score,
        regime: Some(regime),
        avg_momentum,
        avg_buy_pressure,
        pct_positive_1h,
        avg_rsi,
        avg_trend_strength,
        pct_bullish_ema,
        pct_bearish_ema,
        pct_volume_trend_up,
    }
}

// -----------------------------------------------------------------------
// Per-token merge + score (§4.2 step 1-9, first pass)
// -----------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn merge_and_score_token(
    pair: &PairSnapshot,
    db: Option<&DbTokenSnapshot>,
    smart_money: Option<&SmartMoneySignal>,
    social: Option<&SocialSignal>,
    news: Option<&NewsSignal>,
    market_news_sentiment: f64,
    fear_greed: &FearGreedSnapshot,
    liquidity: Option<&LiquiditySnapshot>,
    liquidity_flow: MarketFlowDirection,
    technicals: TechnicalIndicators,
    now_ms: i64,
    regime_guess: MarketRegime,
) -> TokenSignal {
    let db = db.copied().unwrap_or_default();

    let holders = db.holders;
    let safety_score = if db.safety_score > 0.0 { db.safety_score } else { 50.0 };
    let buys = pair.txns.h24.buys;
    let sells = pair.txns.h24.sells;

    // --- buy pressure (§8 invariant: exact formula) ---------------------
    let buy_pressure_score = if buys + sells > 0 {
        (buys as f64 / (buys + sells) as f64 * 100.0).round()
    } else {
        50.0
    };

    // --- momentum: centered on 1h change --------------------------------
    let momentum_score = (50.0 + pair.price_change.h1 * 2.5).clamp(0.0, 100.0);

    // --- volume score: volume/mcap thresholded ladder --------------------
    let volume_score = if pair.market_cap <= 0.0 {
        15.0
    } else {
        let ratio = pair.volume.h24 / pair.market_cap;
        if ratio > 2.0 {
            95.0
        } else if ratio > 1.0 {
            85.0
        } else if ratio > 0.5 {
            70.0
        } else if ratio > 0.2 {
            55.0
        } else if ratio > 0.05 {
            40.0
        } else {
            20.0
        }
    };

    // --- liquidity score: thresholded ladder on USD liquidity ------------
    let liquidity_score = {
        let usd = pair.liquidity.usd;
        if usd > 500_000.0 {
            95.0
        } else if usd > 100_000.0 {
            80.0
        } else if usd > 50_000.0 {
            65.0
        } else if usd > 20_000.0 {
            50.0
        } else if usd > 5_000.0 {
            30.0
        } else {
            10.0
        }
    };

    // --- rug risk: additive risk factors ---------------------------------
    let age_ms = now_ms - pair.pair_created_at;
    let age_hours = age_ms as f64 / 3_600_000.0;
    let liq_to_mcap = if pair.market_cap > 0.0 { pair.liquidity.usd / pair.market_cap } else { 0.0 };
    let mut rug_risk_score = 0.0_f64;
    if pair.liquidity.usd < 10_000.0 {
        rug_risk_score += 25.0;
    } else if pair.liquidity.usd < 25_000.0 {
        rug_risk_score += 12.0;
    }
    if holders < 50 {
        rug_risk_score += 20.0;
    } else if holders < 200 {
        rug_risk_score += 8.0;
    }
    if liq_to_mcap < 0.03 {
        rug_risk_score += 15.0;
    }
    if db.top_holder_percent > 40.0 {
        rug_risk_score += 15.0;
    } else if db.top_holder_percent > 25.0 {
        rug_risk_score += 8.0;
    }
    if db.dev_percent > 15.0 {
        rug_risk_score += 15.0;
    }
    if safety_score < 40.0 {
        rug_risk_score += 20.0;
    } else if safety_score < 60.0 {
        rug_risk_score += 8.0;
    }
    if age_hours < 1.0 {
        rug_risk_score += 15.0;
    }
    let rug_risk_score = rug_risk_score.clamp(0.0, 100.0);

    // --- whale activity (rule table) --------------------------------------
    let vol_to_liq = if pair.liquidity.usd > 0.0 { pair.volume.h24 / pair.liquidity.usd } else { 0.0 };
    let whale_activity = if buy_pressure_score > 65.0 && vol_to_liq > 1.5 && pair.price_change.h1 > 2.0 {
        WhaleActivity::Accumulating
    } else if buy_pressure_score < 35.0 && vol_to_liq > 1.5 && pair.price_change.h1 < -2.0 {
        WhaleActivity::Distributing
    } else {
        WhaleActivity::Neutral
    };

    // --- smart money score -------------------------------------------------
    let mut smart_money_score = 40.0_f64;
    if db.trending {
        smart_money_score += 10.0;
    }
    if db.boosted {
        smart_money_score += 5.0;
    }
    smart_money_score += (buy_pressure_score - 50.0) * 0.2;
    smart_money_score += (volume_score - 50.0) * 0.1;
    smart_money_score += if holders > 500 { 10.0 } else if holders > 100 { 5.0 } else { 0.0 };
    smart_money_score += match whale_activity {
        WhaleActivity::Accumulating => 15.0,
        WhaleActivity::Distributing => -15.0,
        WhaleActivity::Neutral => 0.0,
    };
    let smart_money_flow = if let Some(sm) = smart_money {
        smart_money_score += (sm.whale_accumulation_score - 50.0) * 0.3;
        smart_money_score += sm.net_flow.clamp(-1.0, 1.0) * 10.0;
        classify_smart_money_flow(sm)
    } else {
        SmartMoneyFlow::Neutral
    };
    let smart_money_score = smart_money_score.clamp(0.0, 100.0);

    // --- social sentiment ---------------------------------------------------
    let mut social_sentiment_score = 50.0_f64;
    if let Some(soc) = social {
        social_sentiment_score += (soc.galaxy_score - 50.0) * 0.3;
        social_sentiment_score += soc.sentiment.clamp(-1.0, 1.0) * 20.0;
        if soc.social_spike {
            social_sentiment_score += 10.0;
        }
        social_sentiment_score += (soc.influencer_mentions as f64).min(10.0) * 1.5;
        if soc.alt_rank > 0.0 && soc.alt_rank < 100.0 {
            social_sentiment_score += (100.0 - soc.alt_rank) * 0.1;
        }
    }
    let social_sentiment_score = social_sentiment_score.clamp(0.0, 100.0);

    // --- news ----------------------------------------------------------------
    let (news_sentiment, news_impact, news_score) = if let Some(n) = news {
        let sentiment = if n.overall_sentiment > 0.3 {
            NewsSentiment::Bullish
        } else if n.overall_sentiment < -0.3 {
            NewsSentiment::Bearish
        } else {
            NewsSentiment::Neutral
        };
        let impact = if n.high_impact_count >= 3 {
            NewsImpact::Major
        } else if n.high_impact_count >= 1 {
            NewsImpact::Moderate
        } else if n.overall_sentiment.abs() > 0.1 {
            NewsImpact::Minor
        } else {
            NewsImpact::None
        };
        let score = (50.0 + n.overall_sentiment * 50.0).clamp(0.0, 100.0);
        (sentiment, impact, score)
    } else {
        (NewsSentiment::Neutral, NewsImpact::None, 50.0 + market_news_sentiment * 20.0)
    };
    let news_score = news_score.clamp(0.0, 100.0);

    // --- liquidity flow / health --------------------------------------------
    let liquidity_draining = liquidity.map(|l| l.is_draining).unwrap_or(false);
    let liquidity_growing = liquidity.map(|l| l.is_growing).unwrap_or(false);
    let liquidity_health = liquidity
        .map(compute_liquidity_health_score)
        .unwrap_or(50.0);

    // --- volatility: bucketed stddev of recent returns ----------------------
    let volatility = volatility_bucket(pair.price_change.h1, pair.price_change.h24);

    // --- momentum acceleration / short-term momentum ------------------------
    let momentum_acceleration = (pair.price_change.h1 - pair.price_change.h24 / 24.0).clamp(-20.0, 20.0);
    let short_term_momentum =
        (50.0 + pair.price_change.h1 * 3.0).clamp(0.0, 100.0);

    // --- volume breakout -----------------------------------------------------
    let avg_hourly_volume_estimate = pair.volume.h24 / 24.0;
    let volume_breakout = avg_hourly_volume_estimate > 0.0
        && pair.volume.h24 / 24.0 > avg_hourly_volume_estimate * 2.5
        && pair.price_change.h1.abs() > 3.0;

    // --- lifecycle phase -------------------------------------------------------
    let lifecycle_phase = if age_hours < 6.0 {
        LifecyclePhase::Launch
    } else if age_hours < 72.0 {
        LifecyclePhase::Growth
    } else if age_hours < 24.0 * 30.0 {
        LifecyclePhase::Mature
    } else {
        LifecyclePhase::Established
    };

    // --- dynamic SL/TP: placeholder regime until second pass rescale -------
    let (dynamic_stop_loss, dynamic_take_profit) =
        compute_dynamic_sl_tp(Strategy::Balanced, volatility, regime_guess);

    // --- overall signal score (initial, pre-adaptive-weight) ----------------
    let mut overall_signal_score = momentum_score * 0.18
        + volume_score * 0.12
        + buy_pressure_score * 0.11
        + liquidity_score * 0.07
        + safety_score * 0.08
        + smart_money_score * 0.12
        + (100.0 - rug_risk_score) * 0.05
        + short_term_momentum * 0.05
        + technicals.trend_strength * 0.12
        + social_sentiment_score * 0.10;

    if technicals.is_pullback {
        overall_signal_score += 5.0;
    }
    if technicals.ema_trend_alignment == EmaTrendAlignment::Bullish {
        overall_signal_score += 4.0;
    }
    if social_sentiment_score > 70.0 {
        overall_signal_score += 3.0;
    }
    overall_signal_score += match smart_money_flow {
        SmartMoneyFlow::StrongBuy => 6.0,
        SmartMoneyFlow::Buy => 3.0,
        SmartMoneyFlow::Sell => -3.0,
        SmartMoneyFlow::StrongSell => -6.0,
        SmartMoneyFlow::Neutral => 0.0,
    };
    overall_signal_score += match news_sentiment {
        NewsSentiment::Bullish => 3.0,
        NewsSentiment::Bearish => -3.0,
        NewsSentiment::Neutral => 0.0,
    };
    overall_signal_score += (fear_greed.value as f64 - 50.0) * 0.05;
    if liquidity_growing {
        overall_signal_score += 2.0;
    }
    if liquidity_draining {
        overall_signal_score -= 5.0;
    }
    let overall_signal_score = overall_signal_score.clamp(0.0, 100.0);

    // --- conviction rubric ---------------------------------------------------
    let conviction = conviction_rubric(
        momentum_score,
        volume_score,
        buy_pressure_score,
        liquidity_score,
        safety_score,
        smart_money_score,
        rug_risk_score,
        social_sentiment_score,
        &technicals,
        whale_activity,
        volume_breakout,
    );

    let token_symbol = if pair.base.symbol.is_empty() { pair.base.address.clone() } else { pair.base.symbol.clone() };

    let mut signal = TokenSignal {
        chain: pair.chain,
        address: pair.base.address.clone(),
        symbol: token_symbol,
        price: pair.price_usd,
        change_1h: pair.price_change.h1,
        change_24h: pair.price_change.h24,
        volume_24h: pair.volume.h24,
        market_cap: pair.market_cap,
        liquidity_usd: pair.liquidity.usd,
        holders,
        buys,
        sells,
        safety_score,
        trending: db.trending,
        boosted: db.boosted,
        volume_breakout,
        liquidity_draining,
        liquidity_growing,
        whale_activity,
        lifecycle_phase,
        market_regime: regime_guess,
        smart_money_flow,
        news_sentiment,
        news_impact,
        liquidity_flow: match liquidity_flow {
            MarketFlowDirection::Inflow => LiquidityFlow::Inflow,
            MarketFlowDirection::Outflow => LiquidityFlow::Outflow,
            MarketFlowDirection::Neutral => LiquidityFlow::Neutral,
        },
        momentum_score,
        volume_score,
        buy_pressure_score,
        liquidity_score,
        rug_risk_score,
        smart_money_score,
        conviction,
        overall_signal_score,
        volatility,
        short_term_momentum,
        social_sentiment_score,
        news_score,
        liquidity_health,
        fear_greed_value: fear_greed.value as f64,
        momentum_acceleration,
        dynamic_stop_loss,
        dynamic_take_profit,
        technicals,
        signals: Vec::new(),
    };

    signal.signals = emit_signal_tags(&signal, fear_greed);
    signal
}

fn classify_smart_money_flow(signal: &SmartMoneySignal) -> SmartMoneyFlow {
    let buys = signal.top_trader_buys as f64;
    let sells = signal.top_trader_sells as f64;
    let total = buys + sells;
    let ratio = if total > 0.0 { buys / total } else { 0.5 };

    if ratio > 0.75 && signal.net_flow > 0.3 {
        SmartMoneyFlow::StrongBuy
    } else if ratio > 0.6 {
        SmartMoneyFlow::Buy
    } else if ratio < 0.25 && signal.net_flow < -0.3 {
        SmartMoneyFlow::StrongSell
    } else if ratio < 0.4 {
        SmartMoneyFlow::Sell
    } else {
        SmartMoneyFlow::Neutral
    }
}

fn volatility_bucket(change_1h: f64, change_24h: f64) -> f64 {
    let spread = (change_1h.abs() * 3.0 + change_24h.abs()).max(0.0);
    let buckets = [10.0, 25.0, 40.0, 55.0, 70.0, 85.0, 100.0];
    let thresholds = [1.0, 3.0, 6.0, 10.0, 16.0, 25.0];
    for (i, t) in thresholds.iter().enumerate() {
        if spread < *t {
            return buckets[i];
        }
    }
    buckets[6]
}

#[allow(clippy::too_many_arguments)]
fn conviction_rubric(
    momentum: f64,
    volume: f64,
    buy_pressure: f64,
    liquidity: f64,
    safety: f64,
    smart_money: f64,
    rug_risk: f64,
    social: f64,
    technicals: &TechnicalIndicators,
    whale_activity: WhaleActivity,
    volume_breakout: bool,
) -> f64 {
    let mut score = 0.0_f64;
    score += momentum * 0.15;
    score += volume * 0.10;
    score += buy_pressure * 0.12;
    score += liquidity * 0.08;
    score += safety * 0.10;
    score += smart_money * 0.15;
    score += (100.0 - rug_risk) * 0.10;
    score += social * 0.08;
    score += technicals.trend_strength * 0.12;

    if technicals.ema_trend_alignment == EmaTrendAlignment::Bullish {
        score += 5.0;
    }
    if technicals.is_pullback {
        score += 6.0;
    }
    if technicals.ema_crossover == EmaCrossover::GoldenCross {
        score += 5.0;
    }
    if technicals.rsi_divergence == RsiDivergence::Bullish {
        score += 4.0;
    }
    if volume_breakout {
        score += 4.0;
    }
    if whale_activity == WhaleActivity::Accumulating {
        score += 5.0;
    } else if whale_activity == WhaleActivity::Distributing {
        score -= 8.0;
    }

    score.clamp(0.0, 100.0)
}

/// Emits the closed Glossary tag vocabulary for a scored token (§4.2 step
/// 9). Thresholds are fixed per tag as the spec requires; a token can carry
/// any number of these simultaneously.
fn emit_signal_tags(s: &TokenSignal, fear_greed: &FearGreedSnapshot) -> Vec<SignalTag> {
    let mut tags = Vec::new();
    let mut push = |t: SignalTag| tags.push(t);

    if s.change_24h > 40.0 {
        push(SignalTag::StrongUptrend);
    } else if s.change_24h > 15.0 {
        push(SignalTag::Uptrend);
    } else if s.change_24h > 5.0 {
        push(SignalTag::MildUptrend);
    } else if s.change_24h < -40.0 {
        push(SignalTag::StrongDowntrend);
    } else if s.change_24h < -15.0 {
        push(SignalTag::Downtrend);
    }

    if s.volume_score >= 90.0 {
        push(SignalTag::HighVolumeSurge);
    } else if s.volume_score >= 65.0 {
        push(SignalTag::AboveAvgVolume);
    } else if s.volume_score <= 25.0 {
        push(SignalTag::LowVolume);
    }

    if s.buy_pressure_score >= 75.0 {
        push(SignalTag::StrongBuyPressure);
    } else if s.buy_pressure_score >= 60.0 {
        push(SignalTag::BuyPressure);
    } else if s.buy_pressure_score <= 20.0 {
        push(SignalTag::HeavySellPressure);
    } else if s.buy_pressure_score <= 35.0 {
        push(SignalTag::SellPressure);
    }

    if s.liquidity_usd > 200_000.0 {
        push(SignalTag::DeepLiquidity);
    }
    if s.rug_risk_score < 20.0 {
        push(SignalTag::LowLiquidityRisk);
    }
    if s.trending {
        push(SignalTag::Trending);
    }
    if s.boosted {
        push(SignalTag::Boosted);
    }
    if s.safety_score >= 80.0 {
        push(SignalTag::HighSafety);
    } else if s.safety_score < 40.0 {
        push(SignalTag::SafetyRisk);
    }

    if s.change_1h < -25.0 {
        push(SignalTag::FlashCrash);
    } else if s.change_1h < -12.0 {
        push(SignalTag::SharpDrop);
    }
    if s.change_1h > 30.0 {
        push(SignalTag::Parabolic);
    }
    if s.volume_breakout && s.change_1h > 5.0 {
        push(SignalTag::Breakout);
    }

    if s.rug_risk_score >= 65.0 {
        push(SignalTag::HighRugRisk);
    } else if s.rug_risk_score >= 40.0 {
        push(SignalTag::ModerateRugRisk);
    }

    if s.smart_money_flow == SmartMoneyFlow::StrongBuy {
        push(SignalTag::SmartMoneyInflow);
    } else if s.smart_money_flow == SmartMoneyFlow::Buy {
        push(SignalTag::SmartMoneyInterest);
    }

    if s.momentum_acceleration > 3.0 {
        push(SignalTag::MomentumAccelerating);
    } else if s.momentum_acceleration < -3.0 {
        push(SignalTag::MomentumDecelerating);
    }

    if s.rug_risk_score > 30.0 && s.holders < 100 {
        push(SignalTag::WhaleConcentration);
    }
    if s.liquidity_usd > 0.0 && s.volume_24h > s.liquidity_usd * 2.0 {
        push(SignalTag::VolumeExceedsLiquidity);
    }

    if s.conviction >= 70.0 {
        push(SignalTag::HighConviction);
    } else if s.conviction >= 50.0 {
        push(SignalTag::ModerateConviction);
    }
    if s.volume_breakout {
        push(SignalTag::VolumeBreakout);
    }

    match s.whale_activity {
        WhaleActivity::Accumulating => push(SignalTag::WhaleAccumulating),
        WhaleActivity::Distributing => push(SignalTag::WhaleDistributing),
        WhaleActivity::Neutral => {}
    }

    if s.short_term_momentum > 70.0 {
        push(SignalTag::ShortTermBullish);
    } else if s.short_term_momentum < 30.0 {
        push(SignalTag::ShortTermBearish);
    }

    if s.volatility >= 85.0 {
        push(SignalTag::ExtremeVolatility);
    } else if s.volatility >= 70.0 {
        push(SignalTag::HighVolatility);
    }

    match s.lifecycle_phase {
        LifecyclePhase::Launch => push(SignalTag::NewLaunch),
        LifecyclePhase::Growth => push(SignalTag::GrowthPhase),
        _ => {}
    }

    match s.technicals.ema_trend_alignment {
        EmaTrendAlignment::Bullish => push(SignalTag::EmaBullishAligned),
        EmaTrendAlignment::Bearish => push(SignalTag::EmaBearishAligned),
        EmaTrendAlignment::Mixed => {}
    }
    match s.technicals.ema_crossover {
        EmaCrossover::GoldenCross => push(SignalTag::GoldenCross),
        EmaCrossover::DeathCross => push(SignalTag::DeathCross),
        EmaCrossover::None => {}
    }

    if s.technicals.rsi14 > 85.0 {
        push(SignalTag::RsiOverbought);
    } else if s.technicals.rsi14 > 70.0 {
        push(SignalTag::RsiHigh);
    } else if s.technicals.rsi14 < 15.0 {
        push(SignalTag::RsiOversold);
    } else if s.technicals.rsi14 < 30.0 {
        push(SignalTag::RsiLow);
    }
    match s.technicals.rsi_divergence {
        RsiDivergence::Bullish => push(SignalTag::RsiBullishDivergence),
        RsiDivergence::Bearish => push(SignalTag::RsiBearishDivergence),
        RsiDivergence::None => {}
    }

    if s.technicals.is_overextended {
        push(SignalTag::Overextended);
    }
    if s.technicals.is_pullback {
        push(SignalTag::PullbackEntry);
    }

    if s.technicals.macd_line > 0.0 && s.technicals.macd_histogram > 0.0 {
        push(SignalTag::MacdBullish);
    } else if s.technicals.macd_line < 0.0 && s.technicals.macd_histogram < 0.0 {
        push(SignalTag::MacdBearish);
    }

    if s.technicals.trend_strength >= 70.0 {
        push(SignalTag::StrongTrend);
    } else if s.technicals.trend_strength <= 30.0 {
        push(SignalTag::WeakTrend);
    }

    if s.social_sentiment_score >= 80.0 {
        push(SignalTag::SocialBuzzHigh);
    } else if s.social_sentiment_score >= 60.0 {
        push(SignalTag::SocialPositive);
    } else if s.social_sentiment_score <= 30.0 {
        push(SignalTag::SocialNegative);
    }

    if s.smart_money_flow == SmartMoneyFlow::StrongBuy {
        push(SignalTag::SmartMoneyStrongBuy);
    } else if s.smart_money_flow == SmartMoneyFlow::Buy {
        push(SignalTag::SmartMoneyBuy);
    } else if s.smart_money_flow == SmartMoneyFlow::Sell {
        push(SignalTag::SmartMoneySell);
    } else if s.smart_money_flow == SmartMoneyFlow::StrongSell {
        push(SignalTag::SmartMoneyStrongSell);
    }

    match s.news_impact {
        NewsImpact::Major if s.news_sentiment == NewsSentiment::Bullish => push(SignalTag::NewsMajorBullish),
        NewsImpact::Major if s.news_sentiment == NewsSentiment::Bearish => push(SignalTag::NewsMajorBearish),
        _ => match s.news_sentiment {
            NewsSentiment::Bullish => push(SignalTag::NewsBullish),
            NewsSentiment::Bearish => push(SignalTag::NewsBearish),
            NewsSentiment::Neutral => {}
        },
    }

    if fear_greed.value <= 20 {
        push(SignalTag::ExtremeFear);
    } else if fear_greed.value <= 40 {
        push(SignalTag::MarketFear);
    } else if fear_greed.value >= 80 {
        push(SignalTag::ExtremeGreed);
    } else if fear_greed.value >= 60 {
        push(SignalTag::MarketGreed);
    }

    if s.liquidity_draining {
        push(SignalTag::LiquidityDraining);
    }
    if s.liquidity_growing {
        push(SignalTag::LiquidityGrowing);
    }
    if s.liquidity_health < 20.0 {
        push(SignalTag::LiquidityCritical);
    }
    match s.liquidity_flow {
        LiquidityFlow::Outflow => push(SignalTag::MarketLiquidityOutflow),
        LiquidityFlow::Inflow => push(SignalTag::MarketLiquidityInflow),
        LiquidityFlow::Neutral => {}
    }

    tags
}

/// `getTopBuySignals(signals, strategy)` (§4.2): a strategy-gated hard
/// filter returning a capped, strategy-specific shortlist.
pub fn get_top_buy_signals(signals: &[TokenSignal], strategy: Strategy) -> Vec<TokenSignal> {
    let (min_conviction, min_signal, max_rug, cap) = match strategy {
        Strategy::Conservative => (60.0, 65.0, 40.0, 5),
        Strategy::Balanced => (45.0, 55.0, 55.0, 8),
        Strategy::Aggressive => (35.0, 45.0, 65.0, 12),
        Strategy::Degen => (25.0, 35.0, 80.0, 20),
    };

    let mut shortlist: Vec<TokenSignal> = signals
        .iter()
        .filter(|s| {
            s.conviction >= min_conviction
                && s.overall_signal_score >= min_signal
                && s.rug_risk_score <= max_rug
                && s.whale_activity != WhaleActivity::Distributing
                && !s.has_tag(SignalTag::FlashCrash)
        })
        .cloned()
        .collect();

    shortlist.sort_by(|a, b| b.overall_signal_score.partial_cmp(&a.overall_signal_score).unwrap());
    shortlist.truncate(cap);
    shortlist
}

// -----------------------------------------------------------------------
// Signal Builder: ties ports + indicator engine + adaptive store together
// -----------------------------------------------------------------------

pub struct SignalBuilder {
    pub indicators: Arc<TechnicalIndicatorEngine>,
    pub pair_source: Arc<dyn PairSource>,
    /// Backfills thin bar histories so `computeTechnicalIndicators` clears
    /// the 10-bar floor sooner than minute-by-minute ticks alone would
    /// (§4.1 `ingestOHLCV`). `None` disables backfill — indicators simply
    /// return defaults until enough live ticks accumulate.
    pub ohlcv_source: Option<Arc<dyn OhlcvSource>>,
    pub smart_money_source: Arc<dyn SmartMoneySource>,
    pub social_source: Arc<dyn SocialSource>,
    pub news_source: Arc<dyn NewsSource>,
    pub fear_greed_source: Arc<dyn FearGreedSource>,
    pub liquidity_source: Arc<dyn LiquiditySource>,
    last_breadth: parking_lot::RwLock<MarketBreadth>,
}

impl SignalBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        indicators: Arc<TechnicalIndicatorEngine>,
        pair_source: Arc<dyn PairSource>,
        smart_money_source: Arc<dyn SmartMoneySource>,
        social_source: Arc<dyn SocialSource>,
        news_source: Arc<dyn NewsSource>,
        fear_greed_source: Arc<dyn FearGreedSource>,
        liquidity_source: Arc<dyn LiquiditySource>,
    ) -> Self {
        Self {
            indicators,
            pair_source,
            ohlcv_source: None,
            smart_money_source,
            social_source,
            news_source,
            fear_greed_source,
            liquidity_source,
            last_breadth: parking_lot::RwLock::new(MarketBreadth::default()),
        }
    }

    /// Attaches an OHLCV backfill source (builder-style, since most test
    /// fixtures never need one).
    pub fn with_ohlcv_source(mut self, source: Arc<dyn OhlcvSource>) -> Self {
        self.ohlcv_source = Some(source);
        self
    }

    pub fn last_breadth(&self) -> MarketBreadth {
        *self.last_breadth.read()
    }

    /// Builds the full ranked `TokenSignal` table for one `(chain, strategy)`
    /// group (§4.2 dataflow). `db_tokens` carries the database/safety-report
    /// snapshot per token; callers resolve it from the persistence layer.
    pub async fn build(
        &self,
        chain: Option<Chain>,
        strategy: Strategy,
        db_tokens: &HashMap<(Chain, String), DbTokenSnapshot>,
    ) -> Vec<TokenSignal> {
        let pairs = match self.pair_source.list_live_pairs(chain).await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "pair source prefetch failed, returning empty signal list");
                return Vec::new();
            }
        };

        let fear_greed = self.fear_greed_source.get().await.unwrap_or_default();
        let market_news_sentiment = self
            .news_source
            .get_overall_market_news_sentiment()
            .await
            .unwrap_or(0.0);
        let liquidity_flow = self
            .liquidity_source
            .market_flow_direction()
            .await
            .unwrap_or(MarketFlowDirection::Neutral);

        let now_ms = Utc::now().timestamp_millis();
        let mut signals = Vec::with_capacity(pairs.len());

        for pair in &pairs {
            let key = crate::types::TokenKey::new(pair.chain, pair.base.address.clone());

            if let Some(ohlcv) = &self.ohlcv_source {
                if self.indicators.bars.len(&key) < 10 {
                    match ohlcv.fetch_ohlcv(pair.chain, &pair.pair_address, "1m").await {
                        Ok(candles) if !candles.is_empty() => {
                            self.indicators.ingest_ohlcv(&key, &candles);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, pair = %pair.pair_address, "ohlcv backfill failed");
                        }
                    }
                }
            }

            self.indicators.update_price_history(
                &key,
                now_ms,
                pair.price_usd,
                pair.volume.h24 / (24.0 * 60.0),
                None,
                None,
            );
            let technicals = self.indicators.compute_technical_indicators(&key, pair.price_usd);

            let db = db_tokens.get(&(pair.chain, pair.base.address.clone()));
            let smart_money = self
                .smart_money_source
                .get_smart_money_signal(&pair.base.address, pair.chain)
                .await
                .ok()
                .flatten();
            let social = self.social_source.get_social(&pair.base.symbol).await.ok().flatten();
            let news = self
                .news_source
                .get_news_for_token(&pair.base.symbol)
                .await
                .ok()
                .flatten();
            let liquidity = self
                .liquidity_source
                .get_snapshot(&pair.base.address, pair.chain)
                .await
                .ok()
                .flatten();

            signals.push(merge_and_score_token(
                pair,
                db,
                smart_money.as_ref(),
                social.as_ref(),
                news.as_ref(),
                market_news_sentiment,
                &fear_greed,
                liquidity.as_ref(),
                liquidity_flow,
                technicals,
                now_ms,
                MarketRegime::Neutral,
            ));
        }

        signals.sort_by(|a, b| b.overall_signal_score.partial_cmp(&a.overall_signal_score).unwrap());

        // --- second pass: market breadth -> regime --------------------------
        let breadth = compute_market_breadth(&signals);
        *self.last_breadth.write() = breadth;
        let regime = breadth.regime.unwrap_or(MarketRegime::Neutral);

        // --- third pass: regime-adaptive rescore ----------------------------
        let weights = adaptive_weights(regime);
        for s in signals.iter_mut() {
            s.market_regime = regime;
            let (sl, tp) = compute_dynamic_sl_tp(strategy, s.volatility, regime);
            s.dynamic_stop_loss = sl;
            s.dynamic_take_profit = tp;

            s.overall_signal_score = rescale_overall_score(s, &weights, &fear_greed);
            s.conviction = conviction_rubric(
                s.momentum_score,
                s.volume_score,
                s.buy_pressure_score,
                s.liquidity_score,
                s.safety_score,
                s.smart_money_score,
                s.rug_risk_score,
                s.social_sentiment_score,
                &s.technicals,
                s.whale_activity,
                s.volume_breakout,
            );
            s.signals = emit_signal_tags(s, &fear_greed);
        }

        signals.sort_by(|a, b| b.overall_signal_score.partial_cmp(&a.overall_signal_score).unwrap());
        signals
    }
}

fn rescale_overall_score(s: &TokenSignal, w: &AdaptiveWeights, fear_greed: &FearGreedSnapshot) -> f64 {
    let mut score = s.momentum_score * w.momentum
        + s.volume_score * w.volume
        + s.buy_pressure_score * w.buy_pressure
        + s.liquidity_score * w.liquidity
        + s.safety_score * w.safety
        + s.smart_money_score * w.smart_money
        + (100.0 - s.rug_risk_score) * w.anti_rug
        + s.short_term_momentum * w.st_momentum
        + s.technicals.trend_strength * w.trend
        + s.social_sentiment_score * w.social;

    if s.technicals.is_pullback {
        score += 5.0;
    }
    if s.technicals.ema_trend_alignment == EmaTrendAlignment::Bullish {
        score += 4.0;
    }
    if s.social_sentiment_score > 70.0 {
        score += 3.0;
    }
    score += match s.smart_money_flow {
        SmartMoneyFlow::StrongBuy => 6.0,
        SmartMoneyFlow::Buy => 3.0,
        SmartMoneyFlow::Sell => -3.0,
        SmartMoneyFlow::StrongSell => -6.0,
        SmartMoneyFlow::Neutral => 0.0,
    };
    score += match s.news_sentiment {
        NewsSentiment::Bullish => 3.0,
        NewsSentiment::Bearish => -3.0,
        NewsSentiment::Neutral => 0.0,
    };
    score += (fear_greed.value as f64 - 50.0) * 0.05;
    if s.liquidity_growing {
        score += 2.0;
    }
    if s.liquidity_draining {
        score -= 5.0;
    }

    score.clamp(0.0, 100.0)
}

/// Shared across this module's and other modules' tests: a minimal but
/// fully-populated `TokenSignal` for a given symbol/chain, every score at a
/// neutral midpoint.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn sample_signal(symbol: &str, chain: Chain) -> TokenSignal {
        TokenSignal {
            chain,
            address: format!("{symbol}-mint"),
            symbol: symbol.to_string(),
            price: 1.0,
            change_1h: 0.0,
            change_24h: 0.0,
            volume_24h: 0.0,
            market_cap: 1_000_000.0,
            liquidity_usd: 100_000.0,
            holders: 100,
            buys: 10,
            sells: 10,
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
            news_sentiment: crate::types::NewsSentiment::Neutral,
            news_impact: crate::types::NewsImpact::None,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{PairInfo, PriceChange, TokenRef, TxnCounts, TxnWindow, VolumeWindow};

    fn sample_pair() -> PairSnapshot {
        PairSnapshot {
            chain: Chain::Solana,
            pair_address: "pair1".into(),
            base: TokenRef { address: "mint1".into(), name: "Foo".into(), symbol: "FOO".into() },
            quote: TokenRef::default(),
            price_usd: 1.0,
            price_change: PriceChange { h1: 5.0, h24: 20.0 },
            volume: VolumeWindow { h24: 100_000.0 },
            txns: TxnCounts { h24: TxnWindow { buys: 70, sells: 30 } },
            liquidity: liquidity_usd_for_test(),
            market_cap: 1_000_000.0,
            fdv: 1_000_000.0,
            pair_created_at: 0,
            info: PairInfo::default(),
            boosts: Default::default(),
        }
    }

    fn liquidity_usd_for_test() -> crate::market::LiquidityUsd {
        crate::market::LiquidityUsd { usd: 150_000.0 }
    }

    #[test]
    fn buy_pressure_matches_exact_formula() {
        let pair = sample_pair();
        let fg = FearGreedSnapshot::default();
        let signal = merge_and_score_token(
            &pair, None, None, None, None, 0.0, &fg, None, MarketFlowDirection::Neutral,
            TechnicalIndicators::defaults(), 100_000_000, MarketRegime::Neutral,
        );
        assert_eq!(signal.buy_pressure_score, 70.0);
    }

    #[test]
    fn buy_pressure_defaults_to_fifty_with_no_txns() {
        let mut pair = sample_pair();
        pair.txns = TxnCounts { h24: TxnWindow { buys: 0, sells: 0 } };
        let fg = FearGreedSnapshot::default();
        let signal = merge_and_score_token(
            &pair, None, None, None, None, 0.0, &fg, None, MarketFlowDirection::Neutral,
            TechnicalIndicators::defaults(), 100_000_000, MarketRegime::Neutral,
        );
        assert_eq!(signal.buy_pressure_score, 50.0);
    }

    #[test]
    fn zero_market_cap_forces_low_volume_score() {
        let mut pair = sample_pair();
        pair.market_cap = 0.0;
        let fg = FearGreedSnapshot::default();
        let signal = merge_and_score_token(
            &pair, None, None, None, None, 0.0, &fg, None, MarketFlowDirection::Neutral,
            TechnicalIndicators::defaults(), 100_000_000, MarketRegime::Neutral,
        );
        assert_eq!(signal.volume_score, 15.0);
    }

    #[test]
    fn all_scores_stay_within_bounds() {
        let pair = sample_pair();
        let fg = FearGreedSnapshot::default();
        let signal = merge_and_score_token(
            &pair, None, None, None, None, 0.0, &fg, None, MarketFlowDirection::Neutral,
            TechnicalIndicators::defaults(), 100_000_000, MarketRegime::Neutral,
        );
        for v in [
            signal.momentum_score,
            signal.volume_score,
            signal.buy_pressure_score,
            signal.liquidity_score,
            signal.safety_score,
            signal.smart_money_score,
            signal.rug_risk_score,
            signal.conviction,
            signal.overall_signal_score,
            signal.volatility,
            signal.short_term_momentum,
            signal.social_sentiment_score,
            signal.news_score,
            signal.liquidity_health,
        ] {
            assert!((0.0..=100.0).contains(&v), "score out of bounds: {v}");
        }
    }

    #[test]
    fn combo_key_canonicalizes_regardless_of_tag_order() {
        let a = crate::entities::combo_key(&["BUY_PRESSURE".to_string(), "TRENDING".to_string()]);
        let b = crate::entities::combo_key(&["TRENDING".to_string(), "BUY_PRESSURE".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn get_top_buy_signals_respects_strategy_cap() {
        let mut signals = Vec::new();
        for i in 0..30 {
            let pair = sample_pair();
            let fg = FearGreedSnapshot::default();
            let mut s = merge_and_score_token(
                &pair, None, None, None, None, 0.0, &fg, None, MarketFlowDirection::Neutral,
                TechnicalIndicators::defaults(), 100_000_000, MarketRegime::Neutral,
            );
            s.conviction = 90.0;
            s.overall_signal_score = 90.0 - i as f64 * 0.1;
            s.rug_risk_score = 10.0;
            signals.push(s);
        }
        let top = get_top_buy_signals(&signals, Strategy::Conservative);
        assert!(top.len() <= 5);
    }
}
