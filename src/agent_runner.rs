// =============================================================================
// Agent Runner (§4.7)
// =============================================================================
//
// The orchestrator: a single periodic timer drives one cycle at a time
// (overlapping ticks are dropped, not queued — matching the teacher's
// single-in-flight scan guard), prefetches signals once per `(chain,
// strategy)` group, then runs every agent's cycle concurrently. Per-agent
// state (tracker, cooldown, tier counters) is only ever touched from that
// agent's own task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adaptive_learning::AdaptiveLearningStore;
use crate::agent_tracker::AgentPerformanceTracker;
use crate::config::EngineConfig;
use crate::entities::{AgentConfig, AgentLog, AgentPosition, AgentTrade};
use crate::error::EngineResult;
use crate::oracle::{build_adaptive_context, build_prompts, consult, DecisionOraclePort};
use crate::persistence::{BroadcastEvent, BroadcastPort, PersistencePort};
use crate::position_manager::{self, momentum_reversal_score};
use crate::signal_builder::{DbTokenSnapshot, SignalBuilder, TokenSignal};
use crate::ttl_cache::TtlCache;
use crate::types::{AgentAction, AgentStatus, Chain, MarketRegime, OracleAction, SignalTag, Strategy, TradeType, WhaleActivity};

type GroupKey = (Option<Chain>, Strategy);

/// Owns every long-lived collaborator the Agent Runner needs. Constructed
/// once at process startup and driven via `start`/`stop` (§6 CLI surface).
pub struct AgentRunner {
    config: EngineConfig,
    signal_builder: Arc<SignalBuilder>,
    persistence: Arc<dyn PersistencePort>,
    broadcast: Arc<dyn BroadcastPort>,
    oracle: Arc<dyn DecisionOraclePort>,
    learning_store: Arc<AdaptiveLearningStore>,
    tracker: Arc<AgentPerformanceTracker>,
    group_cache: TtlCache<GroupKey, Arc<Vec<TokenSignal>>>,
    cycle_in_flight: AtomicBool,
    cycle_handle: Mutex<Option<JoinHandle<()>>>,
    daily_reset_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        signal_builder: Arc<SignalBuilder>,
        persistence: Arc<dyn PersistencePort>,
        broadcast: Arc<dyn BroadcastPort>,
        oracle: Arc<dyn DecisionOraclePort>,
        learning_store: Arc<AdaptiveLearningStore>,
        tracker: Arc<AgentPerformanceTracker>,
    ) -> Arc<Self> {
        let signal_cache_ttl = Duration::from_millis(config.signal_cache_ttl_ms);
        Arc::new(Self {
            config,
            signal_builder,
            persistence,
            broadcast,
            oracle,
            learning_store,
            tracker,
            group_cache: TtlCache::new(signal_cache_ttl),
            cycle_in_flight: AtomicBool::new(false),
            cycle_handle: Mutex::new(None),
            daily_reset_handle: Mutex::new(None),
        })
    }

    /// `start(broadcast)` (§6): launches the periodic cycle timer and the
    /// daily `dailyTradesUsed` reset timer. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut cycle_guard = self.cycle_handle.lock().await;
        if cycle_guard.is_none() {
            let runner = Arc::clone(self);
            let period = Duration::from_millis(self.config.cycle_period_ms);
            *cycle_guard = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    runner.clone().tick().await;
                }
            }));
        }
        drop(cycle_guard);

        let mut daily_guard = self.daily_reset_handle.lock().await;
        if daily_guard.is_none() {
            let runner = Arc::clone(self);
            *daily_guard = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
                loop {
                    ticker.tick().await;
                    runner.reset_daily_trade_counts().await;
                }
            }));
        }
        info!("agent runner started");
    }

    /// `stop()` (§6): cancels both timers and halts in-flight cycles.
    pub async fn stop(self: &Arc<Self>) {
        if let Some(handle) = self.cycle_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.daily_reset_handle.lock().await.take() {
            handle.abort();
        }
        info!("agent runner stopped");
    }

    async fn reset_daily_trade_counts(&self) {
        let agents = match self.persistence.list_active_agents().await {
            Ok(agents) => agents,
            Err(e) => {
                error!(error = %e, "failed to list agents for daily reset");
                return;
            }
        };
        for mut agent in agents {
            if agent.daily_trades_used == 0 {
                continue;
            }
            agent.daily_trades_used = 0;
            if let Err(e) = self.persistence.update_agent(&agent).await {
                error!(error = %e, agent_id = %agent.id, "failed to reset daily trade count");
            }
        }
    }

    /// Single-cycle-at-a-time guard (§5): an overlapping tick is dropped,
    /// never queued.
    async fn tick(self: Arc<Self>) {
        if self.cycle_in_flight.swap(true, Ordering::AcqRel) {
            warn!("previous cycle still running, dropping this tick");
            return;
        }
        let started = Instant::now();
        let mut any_error = false;
        if let Err(e) = self.run_cycle().await {
            any_error = true;
            error!(error = %e, "agent cycle aborted");
        }
        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(5) || any_error {
            warn!(elapsed_ms = elapsed.as_millis() as u64, any_error, "slow or errored cycle");
        }
        self.cycle_in_flight.store(false, Ordering::Release);
    }

    async fn run_cycle(&self) -> EngineResult<()> {
        let agents = self.persistence.list_active_agents().await?;
        self.group_cache.clear();

        let mut groups: HashMap<GroupKey, Vec<AgentConfig>> = HashMap::new();
        for agent in agents {
            groups.entry((agent.chain, agent.strategy)).or_default().push(agent);
        }

        // Step 3: prefetch signals per `(chain, strategy)` group in parallel.
        // `db_tokens` (database/safety-report snapshot) is an out-of-scope
        // collaborator the core does not fetch itself; an empty map simply
        // means every token falls back to the live-pair-only defaults.
        let db_tokens: HashMap<(Chain, String), DbTokenSnapshot> = HashMap::new();
        let prefetches = groups.keys().copied().map(|key| {
            let db_tokens = &db_tokens;
            async move {
                let signals = self.signal_builder.build(key.0, key.1, db_tokens).await;
                (key, Arc::new(signals))
            }
        });
        for (key, signals) in join_all(prefetches).await {
            self.group_cache.insert(key, signals);
        }

        // Step 4: run every agent's cycle concurrently.
        let mut tasks = Vec::new();
        for (key, agents_in_group) in groups {
            let signals = self.group_cache.get(&key).unwrap_or_else(|| Arc::new(Vec::new()));
            for agent in agents_in_group {
                tasks.push(self.execute_agent_cycle(agent, Arc::clone(&signals)));
            }
        }
        join_all(tasks).await;
        Ok(())
    }

    // -------------------------------------------------------------------
    // executeAgentCycle (§4.7)
    // -------------------------------------------------------------------

    async fn execute_agent_cycle(&self, mut agent: AgentConfig, signals: Arc<Vec<TokenSignal>>) {
        let agent_id = agent.id.clone();

        // Step 1: subscription check.
        if !self.subscription_active(&agent).await {
            agent.status = AgentStatus::SubscriptionExpired;
            if let Err(e) = self.persistence.update_agent(&agent).await {
                error!(error = %e, agent_id = %agent_id, "failed to persist subscription_expired status");
            }
            self.log(&agent_id, AgentAction::Stopped, "subscription inactive", 0, 0.0, None).await;
            self.broadcast.emit(BroadcastEvent::agent_error(json!({
                "agentId": agent_id,
                "reason": "subscription_expired",
            })));
            return;
        }

        // Step 3: update open positions against this cycle's signals.
        let positions = match self.persistence.list_open_positions_by_agent(&agent_id).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, agent_id = %agent_id, "failed to list open positions");
                return;
            }
        };
        let signal_by_key = index_by_address(&signals);
        let regime = dominant_regime(&signals);
        let any_closed = self.update_positions(&agent, &positions, &signal_by_key, regime).await;
        if any_closed {
            self.broadcast.emit(BroadcastEvent::agent_update(json!({ "agentId": agent_id })));
        }

        // Step 4: re-read the agent; abort if no longer running.
        let agent = match self.persistence.get_agent(&agent_id).await {
            Ok(Some(a)) if a.status == AgentStatus::Running => a,
            Ok(_) => return,
            Err(e) => {
                error!(error = %e, agent_id = %agent_id, "failed to re-read agent");
                return;
            }
        };

        // Step 5: daily trade limit.
        if agent.daily_trades_used >= agent.max_daily_trades {
            self.log(&agent_id, AgentAction::Blocked, "daily trade limit reached", signals.len() as u32, 0.0, None).await;
            return;
        }

        // Step 6: consult the oracle.
        let open_positions = match self.persistence.list_open_positions_by_agent(&agent_id).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, agent_id = %agent_id, "failed to re-list open positions");
                return;
            }
        };
        let position_signals: HashMap<(Chain, String), &TokenSignal> = open_positions
            .iter()
            .filter_map(|p| signal_by_key.get(&(p.chain, p.token_address.clone())).map(|s| ((p.chain, p.token_address.clone()), *s)))
            .collect();
        let recent_trades = self.persistence.get_agent_trades(&agent_id, 20).await.unwrap_or_default();
        let loss_streak = self.tracker.loss_streak(&agent_id);
        let win_streak = 0;
        let breadth = self.signal_builder.last_breadth();
        let (winning_signals, losing_signals, winning_combos, losing_combos) =
            self.adaptive_snippets(&signals, agent.strategy);
        let ctx = build_adaptive_context(
            &self.learning_store,
            regime,
            breadth,
            loss_streak,
            win_streak,
            winning_signals,
            losing_signals,
            winning_combos,
            losing_combos,
        );
        let (system_prompt, user_prompt) =
            build_prompts(agent.strategy, &ctx, &open_positions, &position_signals, &signals, &recent_trades, loss_streak);
        let decision = consult(self.oracle.as_ref(), &system_prompt, &user_prompt).await;

        // Step 7: persist the agent log with full context.
        self.log(
            &agent_id,
            match decision.action {
                OracleAction::Buy => AgentAction::Buy,
                OracleAction::Sell => AgentAction::Sell,
                OracleAction::Hold => AgentAction::Hold,
            },
            &decision.reasoning,
            signals.len() as u32,
            decision.confidence,
            Some(json!({
                "marketRegime": regime.to_string(),
                "breadthScore": breadth.breadth_score,
                "tokenSymbol": decision.token_symbol,
                "signalScore": decision.signal_score,
            })),
        )
        .await;

        // Step 8: hold or missing target -> broadcast and stop.
        if decision.action == OracleAction::Hold || decision.token_symbol.trim().is_empty() {
            self.broadcast.emit(BroadcastEvent::agent_update(json!({ "agentId": agent_id, "action": "hold" })));
            return;
        }

        // Step 9: resolve the target signal.
        let Some(target) = resolve_target_signal(&signals, &decision) else {
            self.log(&agent_id, AgentAction::Skipped, "target token not found in this cycle's signals", signals.len() as u32, decision.confidence, None).await;
            return;
        };
        if target.price <= 0.0 {
            self.log(&agent_id, AgentAction::Skipped, "target token price is non-positive", signals.len() as u32, decision.confidence, None).await;
            return;
        }

        match decision.action {
            OracleAction::Buy => {
                self.try_buy(&agent, target, &decision, &open_positions, &signal_by_key, regime, loss_streak).await;
            }
            OracleAction::Sell => {
                self.try_sell(&agent, target, &decision, &open_positions).await;
            }
            OracleAction::Hold => unreachable!("handled above"),
        }
    }

    // -------------------------------------------------------------------
    // Subscription check (step 1)
    // -------------------------------------------------------------------

    async fn subscription_active(&self, agent: &AgentConfig) -> bool {
        let Ok(Some(user_id)) = self.persistence.wallet_to_user(&agent.wallet_address).await else {
            return false;
        };
        if self.persistence.get_user_active_subscription(&user_id).await.unwrap_or(false) {
            return true;
        }
        if self.persistence.get_user_subscription_including_grace(&user_id).await.unwrap_or(false) {
            return true;
        }
        self.persistence.has_active_promo_access(&user_id).await.unwrap_or(false)
    }

    // -------------------------------------------------------------------
    // Position updates (step 3, §4.5)
    // -------------------------------------------------------------------

    async fn update_positions(
        &self,
        agent: &AgentConfig,
        positions: &[AgentPosition],
        signal_by_key: &HashMap<(Chain, String), &TokenSignal>,
        regime: MarketRegime,
    ) -> bool {
        let mut any_closed = false;
        let now = Utc::now();
        for position in positions {
            let Some(signal) = signal_by_key.get(&(position.chain, position.token_address.clone())) else {
                continue;
            };
            let mut position = position.clone();
            position.current_price = signal.price;
            if signal.price > position.highest_price {
                position.highest_price = signal.price;
            }

            let Some(plan) = position_manager::evaluate_exit(&position, signal, agent.strategy, regime, now) else {
                if let Err(e) = self.persistence.update_position(&position).await {
                    error!(error = %e, position_id = %position.id, "failed to persist price refresh");
                }
                continue;
            };

            let sell_size = position.size * plan.sell_fraction;
            let realized_pnl = (position.current_price - position.avg_entry_price) * sell_size;
            let trade = AgentTrade::new(
                &agent.id,
                position.token_id.clone(),
                TradeType::Sell,
                sell_size,
                position.current_price,
                Some(realized_pnl),
                plan.reason,
                now.to_rfc3339(),
            );
            if let Err(e) = self.persistence.create_agent_trade(&trade).await {
                error!(error = %e, position_id = %position.id, "failed to persist exit trade, aborting trade path");
                continue;
            }

            if plan.is_full_close() {
                if let Err(e) = self.persistence.close_agent_position(&position.id, position.current_price, realized_pnl).await {
                    error!(error = %e, position_id = %position.id, "failed to close position");
                }
                any_closed = true;
                self.learning_store
                    .record_trade_exit(&signal.signal_names(), agent.strategy, position.avg_entry_price, position.current_price, &self.persistence)
                    .await;
                self.tracker.record_trade_exit(&agent.id, &position.token_symbol, position.pnl_percent());
                self.apply_trade_totals(agent, realized_pnl).await;
            } else {
                position.size -= sell_size;
                position.realized_pnl += realized_pnl;
                if plan.increment_tier {
                    position.tier_sells_executed = (position.tier_sells_executed + 1).min(4);
                }
                if let Err(e) = self.persistence.update_position(&position).await {
                    error!(error = %e, position_id = %position.id, "failed to persist partial exit");
                }
            }
        }
        any_closed
    }

    async fn apply_trade_totals(&self, agent: &AgentConfig, realized_pnl: f64) {
        let Ok(Some(mut latest)) = self.persistence.get_agent(&agent.id).await else { return };
        latest.total_trades += 1;
        latest.total_pnl += realized_pnl;
        let wins = (latest.win_rate * (latest.total_trades - 1) as f64).round() as u32 + u32::from(realized_pnl > 0.0);
        latest.win_rate = wins as f64 / latest.total_trades as f64;
        latest.last_trade_at = Some(Utc::now().to_rfc3339());
        if let Err(e) = self.persistence.update_agent(&latest).await {
            error!(error = %e, agent_id = %agent.id, "failed to persist updated agent totals");
        }
    }

    // -------------------------------------------------------------------
    // Adaptive snippets for the oracle's market-context preamble
    // -------------------------------------------------------------------

    fn adaptive_snippets(&self, signals: &[TokenSignal], strategy: Strategy) -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
        let mut winning = Vec::new();
        let mut losing = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for s in signals {
            for name in s.signal_names() {
                if !seen.insert(name.clone()) {
                    continue;
                }
                let mult = self.learning_store.signal_confidence_multiplier(&name, strategy);
                if mult >= 1.2 {
                    winning.push(name);
                } else if mult <= 0.6 {
                    losing.push(name);
                }
            }
        }
        // Combo-level snippets are derived the same way but over observed
        // tag combinations; the per-token combo is exactly `s.signal_names()`.
        let mut winning_combos = Vec::new();
        let mut losing_combos = Vec::new();
        for s in signals {
            let names = s.signal_names();
            if names.is_empty() {
                continue;
            }
            let confidence = self.learning_store.combo_confidence(&names, strategy);
            let combo = crate::entities::combo_key(&names);
            if confidence.blacklisted {
                if !losing_combos.contains(&combo) {
                    losing_combos.push(combo);
                }
            } else if confidence.multiplier >= 1.2 && !winning_combos.contains(&combo) {
                winning_combos.push(combo);
            }
        }
        winning.truncate(10);
        losing.truncate(10);
        winning_combos.truncate(5);
        losing_combos.truncate(5);
        (winning, losing, winning_combos, losing_combos)
    }

    // -------------------------------------------------------------------
    // Buy path (steps 10-13)
    // -------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn try_buy(
        &self,
        agent: &AgentConfig,
        target: &TokenSignal,
        decision: &crate::oracle::Decision,
        open_positions: &[AgentPosition],
        signal_by_key: &HashMap<(Chain, String), &TokenSignal>,
        regime: MarketRegime,
        loss_streak: u32,
    ) {
        let agent_id = &agent.id;
        let thresholds = self.tracker.adaptive_entry_thresholds(agent_id, agent.strategy);

        if target.conviction < thresholds.min_conviction
            || target.overall_signal_score < thresholds.min_signal_score
            || target.momentum_score < thresholds.min_momentum
        {
            self.log(agent_id, AgentAction::Blocked, "below adaptive entry thresholds", 0, decision.confidence, None).await;
            return;
        }

        let combo = self.learning_store.combo_confidence(&target.signal_names(), agent.strategy);
        if combo.blacklisted {
            self.log(agent_id, AgentAction::Blocked, "signal combination is blacklisted", 0, decision.confidence, None).await;
            return;
        }
        if target
            .signal_names()
            .iter()
            .any(|s| self.learning_store.is_signal_blacklisted(s, agent.strategy))
        {
            self.log(agent_id, AgentAction::Blocked, "individual signal is blacklisted", 0, decision.confidence, None).await;
            return;
        }

        let existing_position = open_positions.iter().find(|p| p.chain == target.chain && p.token_address == target.address);
        let max_positions = position_manager::max_positions(agent.strategy);
        if existing_position.is_none() && open_positions.len() >= max_positions {
            self.log(agent_id, AgentAction::Blocked, "max open positions reached", 0, decision.confidence, None).await;
            return;
        }

        let same_chain_cap = (max_positions as f64 * 0.6).ceil().max(2.0) as usize;
        let same_chain_count = open_positions.iter().filter(|p| p.chain == target.chain).count();
        if existing_position.is_none() && same_chain_count >= same_chain_cap {
            self.log(agent_id, AgentAction::Blocked, "same-chain concentration cap reached", 0, decision.confidence, None).await;
            return;
        }

        let correlated = open_positions
            .iter()
            .filter(|p| p.chain == target.chain && p.token_address != target.address)
            .filter(|p| {
                let Some(other) = signal_by_key.get(&(p.chain, p.token_address.clone())) else {
                    return false;
                };
                (target.momentum_score - other.momentum_score).abs() < 12.0
                    && (target.buy_pressure_score - other.buy_pressure_score).abs() < 10.0
            })
            .count();
        if correlated > 2 {
            self.log(agent_id, AgentAction::Blocked, "correlation cap reached", 0, decision.confidence, None).await;
            return;
        }

        if self.tracker.tick_cooldown(agent_id) {
            self.log(agent_id, AgentAction::Blocked, "agent is on a loss-streak cooldown", 0, decision.confidence, None).await;
            return;
        }

        if target.rug_risk_score > position_manager::rug_risk_cap(agent.strategy) {
            self.log(agent_id, AgentAction::Blocked, "rug risk exceeds strategy cap", 0, decision.confidence, None).await;
            return;
        }
        if target.whale_activity == WhaleActivity::Distributing {
            self.log(agent_id, AgentAction::Blocked, "whale distributing", 0, decision.confidence, None).await;
            return;
        }
        if target.has_tag(SignalTag::FlashCrash) || target.has_tag(SignalTag::HeavySellPressure) {
            self.log(agent_id, AgentAction::Blocked, "flash crash or heavy sell pressure", 0, decision.confidence, None).await;
            return;
        }
        if self.tracker.recently_lost_on(agent_id, &target.symbol) {
            self.log(agent_id, AgentAction::Blocked, "recent loss on this token", 0, decision.confidence, None).await;
            return;
        }
        if momentum_reversal_score(target) >= 40.0 {
            self.log(agent_id, AgentAction::Blocked, "momentum reversal severity too high", 0, decision.confidence, None).await;
            return;
        }

        let exposure_cap = agent.max_position_size * max_positions as f64 * 0.8;
        let current_exposure: f64 = open_positions.iter().map(|p| p.size * p.current_price).sum();
        let mut amount = decision.amount;
        if current_exposure + amount * target.price > exposure_cap {
            let budget = (exposure_cap - current_exposure).max(0.0);
            amount = if target.price > 0.0 { budget / target.price } else { 0.0 };
        }

        // Step 11: final sizing ladder.
        let conviction_boost = self.learning_store.adaptive_conviction_boost(&target.signal_names(), agent.strategy);
        let conviction_size = conviction_size(
            target.conviction + conviction_boost,
            agent.max_position_size,
            agent.strategy,
            target.volatility,
            regime,
            target.volume_breakout,
            target.whale_activity,
        );
        amount = amount.min(conviction_size) * thresholds.position_size_multiplier * combo.multiplier.max(0.0001);
        if loss_streak >= 3 {
            amount *= 0.5;
        }
        // Step 12: clamp.
        amount = amount.clamp(0.01, agent.max_position_size);
        if amount <= 0.0 {
            self.log(agent_id, AgentAction::Skipped, "sizing collapsed to zero", 0, decision.confidence, None).await;
            return;
        }

        // Step 13: buy.
        let entry_price = target.price;
        let stop_loss_price = entry_price * (1.0 - target.dynamic_stop_loss / 100.0);
        let take_profit_price = entry_price * (1.0 + target.dynamic_take_profit / 100.0);
        let now = Utc::now().to_rfc3339();

        let position = if let Some(existing) = existing_position {
            let mut merged = existing.clone();
            let total_size = merged.size + amount;
            merged.avg_entry_price = (merged.avg_entry_price * merged.size + entry_price * amount) / total_size;
            merged.size = total_size;
            merged.current_price = entry_price;
            if entry_price > merged.highest_price {
                merged.highest_price = entry_price;
            }
            merged
        } else {
            AgentPosition::new(agent_id, target.chain, &target.address, &target.symbol, entry_price, amount, stop_loss_price, take_profit_price, now.clone())
        };

        if existing_position.is_some() {
            if let Err(e) = self.persistence.update_position(&position).await {
                error!(error = %e, agent_id = %agent_id, "failed to persist merged buy position");
                return;
            }
        } else if let Err(e) = self.persistence.create_position(&position).await {
            error!(error = %e, agent_id = %agent_id, "failed to persist new buy position");
            return;
        }

        let trade = AgentTrade::new(agent_id, position.token_id.clone(), TradeType::Buy, amount, entry_price, None, &decision.reasoning, now);
        if let Err(e) = self.persistence.create_agent_trade(&trade).await {
            error!(error = %e, agent_id = %agent_id, "failed to persist buy trade");
            return;
        }

        let mut updated_agent = agent.clone();
        updated_agent.daily_trades_used += 1;
        if let Err(e) = self.persistence.update_agent(&updated_agent).await {
            error!(error = %e, agent_id = %agent_id, "failed to persist incremented daily trade count");
        }

        self.broadcast.emit(BroadcastEvent::agent_trade(json!({
            "agentId": agent_id,
            "type": "buy",
            "tokenSymbol": target.symbol,
            "amount": amount,
            "price": entry_price,
        })));
    }

    // -------------------------------------------------------------------
    // Sell path (step 14, oracle-initiated)
    // -------------------------------------------------------------------

    async fn try_sell(&self, agent: &AgentConfig, target: &TokenSignal, decision: &crate::oracle::Decision, open_positions: &[AgentPosition]) {
        let agent_id = &agent.id;
        let Some(position) = open_positions.iter().find(|p| p.chain == target.chain && p.token_address == target.address) else {
            self.log(agent_id, AgentAction::Skipped, "skipped, no_position", 0, decision.confidence, None).await;
            return;
        };

        let mut position = position.clone();
        let sell_amount = decision.amount.min(position.size);
        let realized_pnl = (target.price - position.avg_entry_price) * sell_amount;
        let full_close = sell_amount >= 0.95 * position.size;

        let trade = AgentTrade::new(agent_id, position.token_id.clone(), TradeType::Sell, sell_amount, target.price, Some(realized_pnl), &decision.reasoning, Utc::now().to_rfc3339());
        if let Err(e) = self.persistence.create_agent_trade(&trade).await {
            error!(error = %e, agent_id = %agent_id, "failed to persist oracle-initiated sell trade");
            return;
        }

        if full_close {
            if let Err(e) = self.persistence.close_agent_position(&position.id, target.price, realized_pnl).await {
                error!(error = %e, position_id = %position.id, "failed to close position on oracle sell");
            }
            self.learning_store
                .record_trade_exit(&target.signal_names(), agent.strategy, position.avg_entry_price, target.price, &self.persistence)
                .await;
            self.tracker.record_trade_exit(agent_id, &position.token_symbol, position.pnl_percent());
            self.apply_trade_totals(agent, realized_pnl).await;
        } else {
            position.size -= sell_amount;
            position.realized_pnl += realized_pnl;
            position.current_price = target.price;
            if let Err(e) = self.persistence.update_position(&position).await {
                error!(error = %e, position_id = %position.id, "failed to persist partial oracle sell");
            }
        }

        if realized_pnl < 0.0 {
            self.tracker.track_loss(agent_id, &position.token_symbol);
        }

        self.broadcast.emit(BroadcastEvent::agent_trade(json!({
            "agentId": agent_id,
            "type": "sell",
            "tokenSymbol": position.token_symbol,
            "amount": sell_amount,
            "price": target.price,
        })));
    }

    async fn log(&self, agent_id: &str, action: AgentAction, reasoning: &str, tokens_analyzed: u32, confidence: f64, market_context: Option<serde_json::Value>) {
        let log = AgentLog {
            agent_id: agent_id.to_string(),
            action,
            reasoning: reasoning.to_string(),
            tokens_analyzed,
            decision: action.to_string(),
            confidence,
            market_context,
            created_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.persistence.create_agent_log(&log).await {
            error!(error = %e, agent_id, "failed to persist agent log");
        }
    }
}

// -----------------------------------------------------------------------
// Free helpers
// -----------------------------------------------------------------------

fn index_by_address(signals: &[TokenSignal]) -> HashMap<(Chain, String), &TokenSignal> {
    signals.iter().map(|s| ((s.chain, s.address.clone()), s)).collect()
}

/// Majority vote of every signal's own regime classification, falling back
/// to `Neutral` when the cycle produced no signals.
fn dominant_regime(signals: &[TokenSignal]) -> MarketRegime {
    if signals.is_empty() {
        return MarketRegime::Neutral;
    }
    let bull = signals.iter().filter(|s| s.market_regime == MarketRegime::Bull).count();
    let bear = signals.iter().filter(|s| s.market_regime == MarketRegime::Bear).count();
    if bull * 2 > signals.len() {
        MarketRegime::Bull
    } else if bear * 2 > signals.len() {
        MarketRegime::Bear
    } else {
        MarketRegime::Neutral
    }
}

/// Resolves `targetTokenSignal` by `(address, chain)`, then `(symbol,
/// chain)`, then bare symbol (§4.7 step 9).
fn resolve_target_signal<'a>(signals: &'a [TokenSignal], decision: &crate::oracle::Decision) -> Option<&'a TokenSignal> {
    if !decision.token_address.is_empty() {
        if let Some(chain) = decision.chain {
            if let Some(s) = signals.iter().find(|s| s.chain == chain && s.address.eq_ignore_ascii_case(&decision.token_address)) {
                return Some(s);
            }
        }
        if let Some(s) = signals.iter().find(|s| s.address.eq_ignore_ascii_case(&decision.token_address)) {
            return Some(s);
        }
    }
    if !decision.token_symbol.is_empty() {
        if let Some(chain) = decision.chain {
            if let Some(s) = signals.iter().find(|s| s.chain == chain && s.symbol.eq_ignore_ascii_case(&decision.token_symbol)) {
                return Some(s);
            }
        }
        if let Some(s) = signals.iter().find(|s| s.symbol.eq_ignore_ascii_case(&decision.token_symbol)) {
            return Some(s);
        }
    }
    None
}

/// `f(conviction, maxPositionSize, strategy, volatility, regime,
/// volumeBreakout, whaleActivity)` (§4.7 step 11): a thresholded ladder per
/// strategy, same shape as the tiered profit-taking tables in
/// `position_manager`, times a handful of situational multipliers.
#[allow(clippy::too_many_arguments)]
fn conviction_size(
    conviction: f64,
    max_position_size: f64,
    strategy: Strategy,
    volatility: f64,
    regime: MarketRegime,
    volume_breakout: bool,
    whale_activity: WhaleActivity,
) -> f64 {
    let tiers: [(f64, f64); 3] = match strategy {
        Strategy::Conservative => [(85.0, 0.293), (70.0, 0.205), (55.0, 0.132)],
        Strategy::Balanced => [(80.0, 0.293), (65.0, 0.220), (50.0, 0.147)],
        Strategy::Aggressive => [(75.0, 0.293), (60.0, 0.234), (45.0, 0.161)],
        Strategy::Degen => [(70.0, 0.293), (55.0, 0.249), (40.0, 0.176)],
    };
    let floor = match strategy {
        Strategy::Conservative => 0.073,
        Strategy::Balanced => 0.088,
        Strategy::Aggressive => 0.103,
        Strategy::Degen => 0.117,
    };
    let base_fraction = tiers
        .iter()
        .find(|(threshold, _)| conviction >= *threshold)
        .map(|(_, fraction)| *fraction)
        .unwrap_or(floor);

    let mut mult = 1.0_f64;
    match regime {
        MarketRegime::Bull => mult *= 1.15,
        MarketRegime::Bear => mult *= 0.8,
        MarketRegime::Neutral => {}
    }
    if volatility >= 70.0 {
        mult *= 0.85;
    } else if volatility <= 30.0 {
        mult *= 1.05;
    }
    if volume_breakout {
        mult *= 1.1;
    }
    match whale_activity {
        WhaleActivity::Accumulating => mult *= 1.1,
        WhaleActivity::Distributing => mult *= 0.7,
        WhaleActivity::Neutral => {}
    }

    (max_position_size * base_fraction * mult).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conviction_size_scales_with_regime_and_whale_activity() {
        let bull = conviction_size(90.0, 100.0, Strategy::Balanced, 20.0, MarketRegime::Bull, true, WhaleActivity::Accumulating);
        let bear = conviction_size(90.0, 100.0, Strategy::Balanced, 20.0, MarketRegime::Bear, false, WhaleActivity::Distributing);
        assert!(bull > bear);
    }

    #[test]
    fn conviction_size_never_exceeds_max_position_times_best_case_multiplier() {
        let size = conviction_size(95.0, 50.0, Strategy::Degen, 20.0, MarketRegime::Bull, true, WhaleActivity::Accumulating);
        assert!(size <= 50.0 * 1.15 * 1.1 * 1.1 * 1.05 + 1e-9);
    }

    #[test]
    fn resolve_target_signal_falls_back_from_address_to_symbol() {
        let signals = vec![crate::signal_builder::test_support::sample_signal("FOO", Chain::Solana)];
        let decision = crate::oracle::Decision {
            action: OracleAction::Buy,
            token_symbol: "FOO".to_string(),
            token_address: "unknown-address".to_string(),
            chain: Some(Chain::Solana),
            amount: 1.0,
            confidence: 80.0,
            reasoning: String::new(),
            signal_score: 70.0,
        };
        let resolved = resolve_target_signal(&signals, &decision);
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().symbol, "FOO");
    }

    #[test]
    fn dominant_regime_requires_a_majority() {
        let mut signals = vec![crate::signal_builder::test_support::sample_signal("A", Chain::Solana)];
        signals[0].market_regime = MarketRegime::Bull;
        assert_eq!(dominant_regime(&signals), MarketRegime::Bull);
    }
}
