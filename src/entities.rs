// =============================================================================
// Persisted entities (§3 DATA MODEL)
// =============================================================================
//
// These are the records the persistence port reads and writes. The core
// never owns storage; it only defines the shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentStatus, Chain, PositionStatus, Strategy, TradeType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub wallet_address: String,
    pub strategy: Strategy,
    pub chain: Option<Chain>,
    pub status: AgentStatus,
    pub max_position_size: f64,
    pub max_daily_trades: u32,
    pub daily_trades_used: u32,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub risk_level: f64,
    pub total_trades: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub last_trade_at: Option<String>,
}

/// `AgentPosition` invariants (§3):
/// - while `status == Open`, `size > 0`.
/// - on partial sell, `size` decreases and `realized_pnl` accumulates.
/// - a close sets `status = Closed`, `closed_at = Some(now)`; `size` may
///   remain non-zero for audit purposes.
/// - `highest_price` is monotonically non-decreasing while open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPosition {
    pub id: String,
    pub agent_id: String,
    pub token_id: Option<String>,
    pub token_address: String,
    pub token_symbol: String,
    pub chain: Chain,
    pub side: crate::types::PositionSide,
    pub size: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub highest_price: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub trailing_stop_price: Option<f64>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
    pub status: PositionStatus,
    pub opened_at: String,
    pub closed_at: Option<String>,
    /// Tier-sell progress for §4.5 rule 6's tiered profit-taking. Not part
    /// of the distilled entity list but required to persist the "tier
    /// counter is monotonically non-decreasing, never exceeds 4" invariant
    /// (§8) across cycles.
    #[serde(default)]
    pub tier_sells_executed: u8,
}

impl AgentPosition {
    pub fn new(
        agent_id: &str,
        chain: Chain,
        token_address: &str,
        token_symbol: &str,
        entry_price: f64,
        size: f64,
        stop_loss_price: f64,
        take_profit_price: f64,
        opened_at: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            token_id: None,
            token_address: token_address.to_string(),
            token_symbol: token_symbol.to_string(),
            chain,
            side: crate::types::PositionSide::Long,
            size,
            avg_entry_price: entry_price,
            current_price: entry_price,
            highest_price: entry_price,
            stop_loss_price,
            take_profit_price,
            trailing_stop_price: None,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            unrealized_pnl_percent: 0.0,
            status: PositionStatus::Open,
            opened_at,
            closed_at: None,
            tier_sells_executed: 0,
        }
    }

    pub fn pnl_percent(&self) -> f64 {
        if self.avg_entry_price == 0.0 {
            return 0.0;
        }
        (self.current_price - self.avg_entry_price) / self.avg_entry_price * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrade {
    pub agent_id: String,
    pub token_id: Option<String>,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub amount: f64,
    pub price: f64,
    pub total: f64,
    pub pnl: Option<f64>,
    pub reasoning: String,
    pub timestamp: String,
}

impl AgentTrade {
    pub fn new(
        agent_id: &str,
        token_id: Option<String>,
        trade_type: TradeType,
        amount: f64,
        price: f64,
        pnl: Option<f64>,
        reasoning: impl Into<String>,
        timestamp: String,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            token_id,
            trade_type,
            amount,
            price,
            total: amount * price,
            pnl,
            reasoning: reasoning.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLog {
    pub agent_id: String,
    pub action: crate::types::AgentAction,
    pub reasoning: String,
    pub tokens_analyzed: u32,
    pub decision: String,
    pub confidence: f64,
    pub market_context: Option<serde_json::Value>,
    pub created_at: String,
}

/// `{signal, strategy, wins, losses, totalPnl, count, avgPnl}` keyed by
/// `(signal, strategy)`. Combination keys are `COMBO:` followed by the set
/// of signal names joined by `+` in ascending order (§3, §8 combo-key
/// canonicalization law).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPerformance {
    pub signal: String,
    pub strategy: Strategy,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub count: u32,
    pub avg_pnl: f64,
}

impl SignalPerformance {
    pub fn win_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.wins as f64 / self.count as f64
    }
}

/// Canonicalizes a set of signal tag names into the `COMBO:A+B+...` key
/// used for combination performance tracking. Sorting first guarantees
/// `COMBO:A+B == COMBO:B+A` (§8 law).
pub fn combo_key(signals: &[String]) -> String {
    let mut sorted: Vec<&str> = signals.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    format!("COMBO:{}", sorted.join("+"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combo_key_canonicalizes_order() {
        let a = combo_key(&["B".to_string(), "A".to_string()]);
        let b = combo_key(&["A".to_string(), "B".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a, "COMBO:A+B");
    }
}
