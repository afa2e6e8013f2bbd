// =============================================================================
// Decision Oracle Adapter (§4.6)
// =============================================================================
//
// Builds the single prompt sent to the external LLM and defensively parses
// its response. Oracle failures of any kind degrade to a `hold` decision
// with the failure recorded as reasoning (§7) — they never propagate.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::adaptive_learning::AdaptiveLearningStore;
use crate::entities::{AgentPosition, AgentTrade};
use crate::error::EngineResult;
use crate::signal_builder::{get_top_buy_signals, MarketBreadth, TokenSignal};
use crate::strategy_prompts::rule_text;
use crate::types::{Chain, MarketRegime, OracleAction, Strategy};

#[derive(Debug, Clone, Copy)]
pub struct OracleLimits {
    pub max_completion_tokens: u32,
}

impl Default for OracleLimits {
    fn default() -> Self {
        Self { max_completion_tokens: 700 }
    }
}

#[async_trait]
pub trait DecisionOraclePort: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str, limits: OracleLimits) -> EngineResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveMode {
    Defensive,
    Confident,
    Standard,
}

impl AdaptiveMode {
    pub fn from_loss_streak(loss_streak: u32, win_streak: u32) -> Self {
        if loss_streak >= 3 {
            Self::Defensive
        } else if win_streak >= 3 {
            Self::Confident
        } else {
            Self::Standard
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Defensive => "Defensive",
            Self::Confident => "Confident",
            Self::Standard => "Standard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: OracleAction,
    pub token_symbol: String,
    pub token_address: String,
    pub chain: Option<Chain>,
    pub amount: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub signal_score: f64,
}

impl Decision {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            action: OracleAction::Hold,
            token_symbol: String::new(),
            token_address: String::new(),
            chain: None,
            amount: 0.0,
            confidence: 0.0,
            reasoning: reasoning.into(),
            signal_score: 0.0,
        }
    }
}

pub struct AdaptiveContext {
    pub regime: MarketRegime,
    pub breadth: MarketBreadth,
    pub adaptive_mode: AdaptiveMode,
    pub winning_signals: Vec<String>,
    pub losing_signals: Vec<String>,
    pub winning_combos: Vec<String>,
    pub losing_combos: Vec<String>,
}

/// Scans the learning store for human-readable "what's working / what's
/// not" snippets to fold into the market-context preamble.
pub fn build_adaptive_context(
    _store: &AdaptiveLearningStore,
    regime: MarketRegime,
    breadth: MarketBreadth,
    loss_streak: u32,
    win_streak: u32,
    winning_signals: Vec<String>,
    losing_signals: Vec<String>,
    winning_combos: Vec<String>,
    losing_combos: Vec<String>,
) -> AdaptiveContext {
    AdaptiveContext {
        regime,
        breadth,
        adaptive_mode: AdaptiveMode::from_loss_streak(loss_streak, win_streak),
        winning_signals,
        losing_signals,
        winning_combos,
        losing_combos,
    }
}

fn market_context_preamble(ctx: &AdaptiveContext) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Market regime: {} (breadth score {:.0}/100)\n",
        ctx.regime, ctx.breadth.breadth_score
    ));
    out.push_str(&format!("Adaptive mode: {}\n", ctx.adaptive_mode.label()));
    if !ctx.winning_signals.is_empty() {
        out.push_str(&format!("Signals performing well recently: {}\n", ctx.winning_signals.join(", ")));
    }
    if !ctx.losing_signals.is_empty() {
        out.push_str(&format!("Signals performing poorly recently: {}\n", ctx.losing_signals.join(", ")));
    }
    if !ctx.winning_combos.is_empty() {
        out.push_str(&format!("Winning signal combinations: {}\n", ctx.winning_combos.join("; ")));
    }
    if !ctx.losing_combos.is_empty() {
        out.push_str(&format!("Losing signal combinations: {}\n", ctx.losing_combos.join("; ")));
    }
    out
}

fn hold_hours(opened_at: &str) -> f64 {
    chrono::DateTime::parse_from_rfc3339(opened_at)
        .map(|dt| (chrono::Utc::now() - dt.with_timezone(&chrono::Utc)).num_milliseconds() as f64 / 3_600_000.0)
        .unwrap_or(0.0)
}

fn format_portfolio_summary(positions: &[AgentPosition], signals: &HashMap<(Chain, String), &TokenSignal>) -> String {
    if positions.is_empty() {
        return "No open positions.\n".to_string();
    }
    let mut out = String::from("Open positions:\n");
    for p in positions {
        let signal = signals.get(&(p.chain, p.token_address.clone()));
        let whale = signal.map(|s| s.whale_activity.to_string()).unwrap_or_else(|| "unknown".into());
        let stm = signal.map(|s| s.short_term_momentum).unwrap_or(50.0);
        out.push_str(&format!(
            "- {} ({}): size={:.4} avgEntry={:.6} current={:.6} pnl%={:.2} heldHours={:.1} whale={} shortTermMom={:.0}\n",
            p.token_symbol,
            p.chain,
            p.size,
            p.avg_entry_price,
            p.current_price,
            p.pnl_percent(),
            hold_hours(&p.opened_at),
            whale,
            stm,
        ));
    }
    out
}

/// `formatSignalsForAI(signals, limit)` (§4.6): one text line per token with
/// every scalar score, key technical fields, and the signal-tag list.
pub fn format_signals_for_ai(signals: &[TokenSignal], limit: usize) -> String {
    let mut out = String::new();
    for s in signals.iter().take(limit) {
        out.push_str(&format!(
            "{} [{}] price={:.8} 1h={:.1}% 24h={:.1}% mcap={:.0} liq={:.0} conv={:.0} score={:.0} mom={:.0} vol={:.0} buyP={:.0} liqS={:.0} safety={:.0} smart={:.0} rug={:.0} social={:.0} rsi={:.1} trendStrength={:.0} ema={} whale={} regime={} tags=[{}]\n",
            s.symbol,
            s.chain,
            s.price,
            s.change_1h,
            s.change_24h,
            s.market_cap,
            s.liquidity_usd,
            s.conviction,
            s.overall_signal_score,
            s.momentum_score,
            s.volume_score,
            s.buy_pressure_score,
            s.liquidity_score,
            s.safety_score,
            s.smart_money_score,
            s.rug_risk_score,
            s.social_sentiment_score,
            s.technicals.rsi14,
            s.technicals.trend_strength,
            s.technicals.ema_trend_alignment,
            s.whale_activity,
            s.market_regime,
            s.signal_names().join(",")
        ));
    }
    out
}

fn format_recent_trades(trades: &[AgentTrade], loss_streak: u32) -> String {
    let mut out = String::new();
    if trades.is_empty() {
        out.push_str("No recent trades.\n");
    } else {
        out.push_str("Last trades:\n");
        for t in trades.iter().rev().take(5) {
            out.push_str(&format!(
                "- {} {:.4} @ {:.6} pnl={}\n",
                t.trade_type,
                t.amount,
                t.price,
                t.pnl.map(|p| format!("{p:.4}")).unwrap_or_else(|| "n/a".into())
            ));
        }
    }
    if loss_streak >= 3 {
        out.push_str(&format!("WARNING: {loss_streak} consecutive losing trades. Trade conservatively.\n"));
    }
    out
}

#[allow(clippy::too_many_arguments)]
pub fn build_prompts(
    strategy: Strategy,
    ctx: &AdaptiveContext,
    positions: &[AgentPosition],
    position_signals: &HashMap<(Chain, String), &TokenSignal>,
    signals: &[TokenSignal],
    recent_trades: &[AgentTrade],
    loss_streak: u32,
) -> (String, String) {
    let system_prompt = rule_text(strategy).to_string();

    let mut user_prompt = String::new();
    user_prompt.push_str(&market_context_preamble(ctx));
    user_prompt.push('\n');
    user_prompt.push_str(&format_portfolio_summary(positions, position_signals));
    user_prompt.push('\n');
    user_prompt.push_str("Top ranked signals:\n");
    user_prompt.push_str(&format_signals_for_ai(signals, 30));
    user_prompt.push('\n');

    let shortlist = get_top_buy_signals(signals, strategy);
    if shortlist.is_empty() {
        user_prompt.push_str("No candidates clear the strategy's buy filter this cycle.\n");
    } else {
        user_prompt.push_str("Pre-filtered buy candidates:\n");
        user_prompt.push_str(&format_signals_for_ai(&shortlist, shortlist.len()));
    }
    user_prompt.push('\n');
    user_prompt.push_str(&format_recent_trades(recent_trades, loss_streak));
    user_prompt.push_str(
        "\nRespond with a single JSON object: {\"action\": \"buy\"|\"sell\"|\"hold\", \"tokenSymbol\": string, \"tokenAddress\": string, \"chain\": string, \"amount\": number, \"confidence\": number (0-100), \"reasoning\": string, \"signalScore\": number}. No prose outside the JSON.\n",
    );

    (system_prompt, user_prompt)
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: Option<String>,
    #[serde(alias = "tokenSymbol")]
    token_symbol: Option<String>,
    #[serde(alias = "tokenAddress")]
    token_address: Option<String>,
    chain: Option<String>,
    amount: Option<f64>,
    confidence: Option<f64>,
    reasoning: Option<String>,
    #[serde(alias = "signalScore")]
    signal_score: Option<f64>,
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

/// Defensive parsing (§4.6): strip fences, JSON-parse, coerce any invalid
/// `action` to `hold`. Never returns an error — a malformed response just
/// becomes a hold decision with the parse failure as reasoning.
pub fn parse_decision(raw: &str) -> Decision {
    let cleaned = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(e) => return Decision::hold(format!("oracle response was not valid JSON: {e}")),
    };
    let parsed: RawDecision = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => return Decision::hold(format!("oracle response missing expected fields: {e}")),
    };

    let action = parsed
        .action
        .as_deref()
        .and_then(|a| a.parse::<OracleAction>().ok())
        .unwrap_or(OracleAction::Hold);

    let chain = parsed.chain.as_deref().and_then(|c| c.parse::<Chain>().ok());

    Decision {
        action,
        token_symbol: parsed.token_symbol.unwrap_or_default(),
        token_address: parsed.token_address.unwrap_or_default(),
        chain,
        amount: parsed.amount.unwrap_or(0.0).max(0.0),
        confidence: parsed.confidence.unwrap_or(0.0).clamp(0.0, 100.0),
        reasoning: parsed.reasoning.unwrap_or_default(),
        signal_score: parsed.signal_score.unwrap_or(0.0),
    }
}

/// Invokes the oracle and always returns a usable `Decision` — failures at
/// any stage degrade to `hold` rather than propagating (§7 oracle-failure
/// policy).
pub async fn consult(
    port: &dyn DecisionOraclePort,
    system_prompt: &str,
    user_prompt: &str,
) -> Decision {
    match port.generate(system_prompt, user_prompt, OracleLimits::default()).await {
        Ok(raw) => parse_decision(&raw),
        Err(e) => {
            warn!(error = %e, "oracle consult failed");
            Decision::hold(format!("oracle error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let raw = r#"{"action":"buy","tokenSymbol":"FOO","tokenAddress":"mint1","chain":"solana","amount":0.5,"confidence":80,"reasoning":"strong breakout","signalScore":75}"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.action, OracleAction::Buy);
        assert_eq!(decision.token_symbol, "FOO");
        assert_eq!(decision.chain, Some(Chain::Solana));
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"action\":\"hold\",\"tokenSymbol\":\"\",\"tokenAddress\":\"\",\"chain\":\"solana\",\"amount\":0,\"confidence\":0,\"reasoning\":\"nothing clears\",\"signalScore\":0}\n```";
        let decision = parse_decision(raw);
        assert_eq!(decision.action, OracleAction::Hold);
    }

    #[test]
    fn unknown_action_coerces_to_hold() {
        let raw = r#"{"action":"yolo","tokenSymbol":"","tokenAddress":"","chain":"solana","amount":0,"confidence":0,"reasoning":"","signalScore":0}"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.action, OracleAction::Hold);
    }

    #[test]
    fn malformed_json_becomes_hold_with_reason() {
        let decision = parse_decision("not json at all");
        assert_eq!(decision.action, OracleAction::Hold);
        assert!(!decision.reasoning.is_empty());
    }

    #[test]
    fn adaptive_mode_is_defensive_after_loss_streak() {
        assert_eq!(AdaptiveMode::from_loss_streak(3, 0), AdaptiveMode::Defensive);
        assert_eq!(AdaptiveMode::from_loss_streak(0, 4), AdaptiveMode::Confident);
        assert_eq!(AdaptiveMode::from_loss_streak(1, 1), AdaptiveMode::Standard);
    }
}
