// =============================================================================
// Shared types used across the signal fusion and agent decision engine
// =============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Chain
// -----------------------------------------------------------------------

/// The closed set of chains an agent can hold positions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Ethereum,
    Base,
    Bsc,
    Tron,
}

impl Default for Chain {
    fn default() -> Self {
        Self::Solana
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Solana => "solana",
            Self::Ethereum => "ethereum",
            Self::Base => "base",
            Self::Bsc => "bsc",
            Self::Tron => "tron",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Chain {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solana" => Ok(Self::Solana),
            "ethereum" => Ok(Self::Ethereum),
            "base" => Ok(Self::Base),
            "bsc" => Ok(Self::Bsc),
            "tron" => Ok(Self::Tron),
            _ => Err(()),
        }
    }
}

/// Token identity: `(chain, address)` is the canonical key. Symbols are
/// display-only and never used for lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    pub chain: Chain,
    pub address: String,
}

impl TokenKey {
    pub fn new(chain: Chain, address: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

// -----------------------------------------------------------------------
// Strategy
// -----------------------------------------------------------------------

/// The four configurable agent strategies. Every threshold table in the
/// engine is keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Conservative,
    Balanced,
    Aggressive,
    Degen,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
            Self::Degen => "degen",
        };
        write!(f, "{s}")
    }
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Conservative,
        Strategy::Balanced,
        Strategy::Aggressive,
        Strategy::Degen,
    ];
}

// -----------------------------------------------------------------------
// Agent status
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Stopped,
    SubscriptionExpired,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::SubscriptionExpired => "subscription_expired",
        };
        write!(f, "{s}")
    }
}

// -----------------------------------------------------------------------
// Position status / side
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Positions are long-only per the data model; the field exists so the
/// wire shape matches the persisted entity even though only one variant
/// is ever constructed today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "long")
    }
}

// -----------------------------------------------------------------------
// Trade type / agent log action
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentAction {
    Buy,
    Sell,
    Hold,
    Blocked,
    Skipped,
    Error,
    Stopped,
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

// -----------------------------------------------------------------------
// Oracle decision action
// -----------------------------------------------------------------------

/// Coerced from whatever the oracle returns; an unrecognized value always
/// becomes `Hold` rather than surfacing a parse error (§8 boundary
/// behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleAction {
    Buy,
    Sell,
    Hold,
}

impl FromStr for OracleAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "hold" => Ok(Self::Hold),
            _ => Err(()),
        }
    }
}

// -----------------------------------------------------------------------
// Market / token categorical enums (§3 TokenSignal)
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhaleActivity {
    Accumulating,
    Distributing,
    Neutral,
}

impl fmt::Display for WhaleActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accumulating => "accumulating",
            Self::Distributing => "distributing",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Launch,
    Growth,
    Mature,
    Established,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Launch => "launch",
            Self::Growth => "growth",
            Self::Mature => "mature",
            Self::Established => "established",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Neutral,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bull => "bull",
            Self::Bear => "bear",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartMoneyFlow {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl fmt::Display for SmartMoneyFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StrongBuy => "strong_buy",
            Self::Buy => "buy",
            Self::Neutral => "neutral",
            Self::Sell => "sell",
            Self::StrongSell => "strong_sell",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsSentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for NewsSentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsImpact {
    Major,
    Moderate,
    Minor,
    None,
}

impl fmt::Display for NewsImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Major => "major",
            Self::Moderate => "moderate",
            Self::Minor => "minor",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityFlow {
    Inflow,
    Outflow,
    Neutral,
}

impl fmt::Display for LiquidityFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmaTrendAlignment {
    Bullish,
    Bearish,
    Mixed,
}

impl fmt::Display for EmaTrendAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaCrossover {
    GoldenCross,
    DeathCross,
    None,
}

impl fmt::Display for EmaCrossover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GoldenCross => "golden_cross",
            Self::DeathCross => "death_cross",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiDivergence {
    Bullish,
    Bearish,
    None,
}

impl fmt::Display for RsiDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for VolumeTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        };
        write!(f, "{s}")
    }
}

/// Open Question #1 resolution: the Fear & Greed trading bias is a single
/// closed enum, never a nested `{bias: ...}` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingBias {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradingBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

// -----------------------------------------------------------------------
// Signal tags — the closed Glossary vocabulary
// -----------------------------------------------------------------------

/// Every string signal tag a `TokenSignal` can carry. Closed per the
/// Glossary; map-backed adaptive-learning counters use this enum's
/// `as_str()` form as the key rather than a free-form `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTag {
    StrongUptrend,
    Uptrend,
    MildUptrend,
    StrongDowntrend,
    Downtrend,
    HighVolumeSurge,
    AboveAvgVolume,
    LowVolume,
    StrongBuyPressure,
    BuyPressure,
    HeavySellPressure,
    SellPressure,
    DeepLiquidity,
    LowLiquidityRisk,
    Trending,
    Boosted,
    HighSafety,
    SafetyRisk,
    FlashCrash,
    SharpDrop,
    Parabolic,
    Breakout,
    HighRugRisk,
    ModerateRugRisk,
    SmartMoneyInflow,
    SmartMoneyInterest,
    MomentumAccelerating,
    MomentumDecelerating,
    WhaleConcentration,
    VolumeExceedsLiquidity,
    HighConviction,
    ModerateConviction,
    VolumeBreakout,
    WhaleAccumulating,
    WhaleDistributing,
    ShortTermBullish,
    ShortTermBearish,
    ExtremeVolatility,
    HighVolatility,
    NewLaunch,
    GrowthPhase,
    EmaBullishAligned,
    EmaBearishAligned,
    GoldenCross,
    DeathCross,
    RsiOverbought,
    RsiHigh,
    RsiOversold,
    RsiLow,
    RsiBullishDivergence,
    RsiBearishDivergence,
    Overextended,
    PullbackEntry,
    MacdBullish,
    MacdBearish,
    StrongTrend,
    WeakTrend,
    SocialBuzzHigh,
    SocialPositive,
    SocialNegative,
    SocialSpike,
    SmartMoneyStrongBuy,
    SmartMoneyBuy,
    SmartMoneySell,
    SmartMoneyStrongSell,
    NewsMajorBullish,
    NewsBullish,
    NewsBearish,
    NewsMajorBearish,
    ExtremeFear,
    MarketFear,
    ExtremeGreed,
    MarketGreed,
    LiquidityDraining,
    LiquidityGrowing,
    LiquidityCritical,
    MarketLiquidityOutflow,
    MarketLiquidityInflow,
}

impl SignalTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongUptrend => "STRONG_UPTREND",
            Self::Uptrend => "UPTREND",
            Self::MildUptrend => "MILD_UPTREND",
            Self::StrongDowntrend => "STRONG_DOWNTREND",
            Self::Downtrend => "DOWNTREND",
            Self::HighVolumeSurge => "HIGH_VOLUME_SURGE",
            Self::AboveAvgVolume => "ABOVE_AVG_VOLUME",
            Self::LowVolume => "LOW_VOLUME",
            Self::StrongBuyPressure => "STRONG_BUY_PRESSURE",
            Self::BuyPressure => "BUY_PRESSURE",
            Self::HeavySellPressure => "HEAVY_SELL_PRESSURE",
            Self::SellPressure => "SELL_PRESSURE",
            Self::DeepLiquidity => "DEEP_LIQUIDITY",
            Self::LowLiquidityRisk => "LOW_LIQUIDITY_RISK",
            Self::Trending => "TRENDING",
            Self::Boosted => "BOOSTED",
            Self::HighSafety => "HIGH_SAFETY",
            Self::SafetyRisk => "SAFETY_RISK",
            Self::FlashCrash => "FLASH_CRASH",
            Self::SharpDrop => "SHARP_DROP",
            Self::Parabolic => "PARABOLIC",
            Self::Breakout => "BREAKOUT",
            Self::HighRugRisk => "HIGH_RUG_RISK",
            Self::ModerateRugRisk => "MODERATE_RUG_RISK",
            Self::SmartMoneyInflow => "SMART_MONEY_INFLOW",
            Self::SmartMoneyInterest => "SMART_MONEY_INTEREST",
            Self::MomentumAccelerating => "MOMENTUM_ACCELERATING",
            Self::MomentumDecelerating => "MOMENTUM_DECELERATING",
            Self::WhaleConcentration => "WHALE_CONCENTRATION",
            Self::VolumeExceedsLiquidity => "VOLUME_EXCEEDS_LIQUIDITY",
            Self::HighConviction => "HIGH_CONVICTION",
            Self::ModerateConviction => "MODERATE_CONVICTION",
            Self::VolumeBreakout => "VOLUME_BREAKOUT",
            Self::WhaleAccumulating => "WHALE_ACCUMULATING",
            Self::WhaleDistributing => "WHALE_DISTRIBUTING",
            Self::ShortTermBullish => "SHORT_TERM_BULLISH",
            Self::ShortTermBearish => "SHORT_TERM_BEARISH",
            Self::ExtremeVolatility => "EXTREME_VOLATILITY",
            Self::HighVolatility => "HIGH_VOLATILITY",
            Self::NewLaunch => "NEW_LAUNCH",
            Self::GrowthPhase => "GROWTH_PHASE",
            Self::EmaBullishAligned => "EMA_BULLISH_ALIGNED",
            Self::EmaBearishAligned => "EMA_BEARISH_ALIGNED",
            Self::GoldenCross => "GOLDEN_CROSS",
            Self::DeathCross => "DEATH_CROSS",
            Self::RsiOverbought => "RSI_OVERBOUGHT",
            Self::RsiHigh => "RSI_HIGH",
            Self::RsiOversold => "RSI_OVERSOLD",
            Self::RsiLow => "RSI_LOW",
            Self::RsiBullishDivergence => "RSI_BULLISH_DIVERGENCE",
            Self::RsiBearishDivergence => "RSI_BEARISH_DIVERGENCE",
            Self::Overextended => "OVEREXTENDED",
            Self::PullbackEntry => "PULLBACK_ENTRY",
            Self::MacdBullish => "MACD_BULLISH",
            Self::MacdBearish => "MACD_BEARISH",
            Self::StrongTrend => "STRONG_TREND",
            Self::WeakTrend => "WEAK_TREND",
            Self::SocialBuzzHigh => "SOCIAL_BUZZ_HIGH",
            Self::SocialPositive => "SOCIAL_POSITIVE",
            Self::SocialNegative => "SOCIAL_NEGATIVE",
            Self::SocialSpike => "SOCIAL_SPIKE",
            Self::SmartMoneyStrongBuy => "SMART_MONEY_STRONG_BUY",
            Self::SmartMoneyBuy => "SMART_MONEY_BUY",
            Self::SmartMoneySell => "SMART_MONEY_SELL",
            Self::SmartMoneyStrongSell => "SMART_MONEY_STRONG_SELL",
            Self::NewsMajorBullish => "NEWS_MAJOR_BULLISH",
            Self::NewsBullish => "NEWS_BULLISH",
            Self::NewsBearish => "NEWS_BEARISH",
            Self::NewsMajorBearish => "NEWS_MAJOR_BEARISH",
            Self::ExtremeFear => "EXTREME_FEAR",
            Self::MarketFear => "MARKET_FEAR",
            Self::ExtremeGreed => "EXTREME_GREED",
            Self::MarketGreed => "MARKET_GREED",
            Self::LiquidityDraining => "LIQUIDITY_DRAINING",
            Self::LiquidityGrowing => "LIQUIDITY_GROWING",
            Self::LiquidityCritical => "LIQUIDITY_CRITICAL",
            Self::MarketLiquidityOutflow => "MARKET_LIQUIDITY_OUTFLOW",
            Self::MarketLiquidityInflow => "MARKET_LIQUIDITY_INFLOW",
        }
    }
}

impl fmt::Display for SignalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for SignalTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
