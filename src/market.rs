// =============================================================================
// Data-source ports (§6) — market/social/news/F&G/liquidity fetchers
// =============================================================================
//
// Each port is a single-method `async_trait`, object-safe, so the engine can
// be built against a live HTTP-backed implementation or a test double
// without conditional compilation. The shapes here are exactly the ones
// named in spec §6 — this module defines the boundary, not the providers
// behind it (DexScreener, LunarCrush, CryptoPanic, ... are out of scope).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{Chain, TradingBias};

// -----------------------------------------------------------------------
// Pair source (DexScreener-like)
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceChange {
    pub h1: f64,
    pub h24: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeWindow {
    pub h24: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxnWindow {
    pub buys: u32,
    pub sells: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxnCounts {
    pub h24: TxnWindow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidityUsd {
    pub usd: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairInfo {
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairBoosts {
    pub active: u32,
}

/// One live pair as reported by the pair source. Holders/dev%/top-holder%
/// and the safety score come from a separate database/safety-report
/// snapshot per §4.2, not this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub chain: Chain,
    pub pair_address: String,
    pub base: TokenRef,
    pub quote: TokenRef,
    pub price_usd: f64,
    pub price_change: PriceChange,
    pub volume: VolumeWindow,
    pub txns: TxnCounts,
    pub liquidity: LiquidityUsd,
    pub market_cap: f64,
    pub fdv: f64,
    pub pair_created_at: i64,
    pub info: PairInfo,
    pub boosts: PairBoosts,
}

#[async_trait]
pub trait PairSource: Send + Sync {
    /// `listLivePairs()` — cache ≈ 30s at the implementation's discretion.
    async fn list_live_pairs(&self, chain: Option<Chain>) -> EngineResult<Vec<PairSnapshot>>;
}

// -----------------------------------------------------------------------
// OHLCV source
// -----------------------------------------------------------------------

#[async_trait]
pub trait OhlcvSource: Send + Sync {
    /// `fetchOHLCV(chain, pairAddress, timeframe)` — cache 60s.
    async fn fetch_ohlcv(
        &self,
        chain: Chain,
        pair_address: &str,
        timeframe: &str,
    ) -> EngineResult<Vec<crate::indicators::PriceBar>>;
}

// -----------------------------------------------------------------------
// Smart-money signal
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SmartMoneySignal {
    pub top_trader_buys: u32,
    pub top_trader_sells: u32,
    pub net_flow: f64,
    pub whale_accumulation_score: f64,
    pub top_wallet_count: u32,
    pub avg_wallet_win_rate: f64,
    pub avg_wallet_pnl: f64,
}

#[async_trait]
pub trait SmartMoneySource: Send + Sync {
    async fn get_smart_money_signal(
        &self,
        address: &str,
        chain: Chain,
    ) -> EngineResult<Option<SmartMoneySignal>>;
}

// -----------------------------------------------------------------------
// Social signal
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SocialSignal {
    pub galaxy_score: f64,
    pub alt_rank: f64,
    pub social_volume: f64,
    pub sentiment: f64,
    pub social_spike: bool,
    pub influencer_mentions: u32,
}

#[async_trait]
pub trait SocialSource: Send + Sync {
    async fn get_social(&self, symbol: &str) -> EngineResult<Option<SocialSignal>>;
}

// -----------------------------------------------------------------------
// News
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NewsSignal {
    pub overall_sentiment: f64,
    pub high_impact_count: u32,
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn get_news_for_token(&self, symbol: &str) -> EngineResult<Option<NewsSignal>>;
    async fn get_overall_market_news_sentiment(&self) -> EngineResult<f64>;
}

// -----------------------------------------------------------------------
// Fear & Greed
// -----------------------------------------------------------------------

/// Open Question #1 resolution: a single flat shape; `trading_bias` is
/// always the closed enum, never a nested `{bias: ...}` object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FearGreedSnapshot {
    pub value: u8,
    pub classification: &'static str,
    pub trend: &'static str,
    pub trading_bias: TradingBias,
}

impl Default for FearGreedSnapshot {
    fn default() -> Self {
        Self {
            value: 50,
            classification: "Neutral",
            trend: "flat",
            trading_bias: TradingBias::Hold,
        }
    }
}

#[async_trait]
pub trait FearGreedSource: Send + Sync {
    /// `get()` — source cadence 10 min.
    async fn get(&self) -> EngineResult<FearGreedSnapshot>;
}

// -----------------------------------------------------------------------
// Liquidity
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LiquiditySnapshot {
    pub current_liquidity: f64,
    pub change_percent: f64,
    pub is_draining: bool,
    pub is_growing: bool,
    pub volume_to_liq_ratio: f64,
    pub has_abnormal_activity: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketFlowDirection {
    Inflow,
    Outflow,
    Neutral,
}

#[async_trait]
pub trait LiquiditySource: Send + Sync {
    async fn get_snapshot(
        &self,
        address: &str,
        chain: Chain,
    ) -> EngineResult<Option<LiquiditySnapshot>>;

    async fn market_flow_direction(&self) -> EngineResult<MarketFlowDirection>;
}

/// Canonicalized per Open Question #3: `computeLiquidityHealthScore` takes
/// a single snapshot argument. Callers that only hold `(address, chain)`
/// resolve the snapshot via `LiquiditySource::get_snapshot` first.
pub fn compute_liquidity_health_score(snapshot: &LiquiditySnapshot) -> f64 {
    let mut score = 50.0_f64;

    if snapshot.is_growing {
        score += 20.0;
    }
    if snapshot.is_draining {
        score -= 30.0;
    }
    if snapshot.change_percent > 10.0 {
        score += 10.0;
    } else if snapshot.change_percent < -10.0 {
        score -= 15.0;
    }
    if snapshot.volume_to_liq_ratio > 3.0 {
        score -= 10.0;
    }
    if snapshot.has_abnormal_activity {
        score -= 15.0;
    }
    if snapshot.current_liquidity < 5_000.0 {
        score -= 20.0;
    } else if snapshot.current_liquidity > 100_000.0 {
        score += 10.0;
    }

    score.clamp(0.0, 100.0)
}
