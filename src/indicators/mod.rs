// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators
// used by the engine, plus the bar ring and orchestration layer that turns
// them into a per-token `TechnicalIndicators` snapshot (§4.1).

pub mod atr;
pub mod bar;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod technical;

pub use bar::{BarRing, PriceBar};
pub use technical::{compute_technical_indicators, TechnicalIndicatorEngine, TechnicalIndicators};
