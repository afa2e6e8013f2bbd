// =============================================================================
// Agent Performance Tracker (§4.4) + per-agent Cooldown and RecentLoss state
// =============================================================================
//
// Process-local, ephemeral, created lazily on first reference. Mutated only
// from that agent's own cycle (§5: "cross-agent access is forbidden"), so a
// plain `RwLock<HashMap<AgentId, T>>` per concern is sufficient — no
// per-entry locking is needed because the Agent Runner never touches two
// agents' entries concurrently from the same task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::Strategy;

const ROLLING_WINDOW: Duration = Duration::from_secs(24 * 3600);
const MAX_RECENT_TRADES: usize = 50;
const MAX_RECENT_LOSSES: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct RecentTrade {
    pub pnl_percent: f64,
    pub at: Instant,
}

/// `{recentTrades, winStreak, lossStreak, adaptiveThresholdOffset, lastUpdate}` (§3).
#[derive(Debug, Clone)]
pub struct PerAgentTracker {
    pub recent_trades: Vec<RecentTrade>,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub adaptive_threshold_offset: f64,
    pub last_update: Instant,
}

impl Default for PerAgentTracker {
    fn default() -> Self {
        Self {
            recent_trades: Vec::new(),
            win_streak: 0,
            loss_streak: 0,
            adaptive_threshold_offset: 0.0,
            last_update: Instant::now(),
        }
    }
}

impl PerAgentTracker {
    fn prune(&mut self) {
        let now = Instant::now();
        self.recent_trades.retain(|t| now.duration_since(t.at) <= ROLLING_WINDOW);
        if self.recent_trades.len() > MAX_RECENT_TRADES {
            let excess = self.recent_trades.len() - MAX_RECENT_TRADES;
            self.recent_trades.drain(0..excess);
        }
    }

    fn record_exit(&mut self, pnl_percent: f64) {
        self.recent_trades.push(RecentTrade { pnl_percent, at: Instant::now() });
        self.prune();

        if pnl_percent > 0.0 {
            self.win_streak += 1;
            self.loss_streak = 0;
            if self.win_streak >= 3 {
                self.adaptive_threshold_offset = (self.adaptive_threshold_offset - 2.0).max(-10.0);
            }
        } else {
            self.loss_streak += 1;
            self.win_streak = 0;
            let bump = if self.loss_streak >= 3 { 5.0 } else { 3.0 };
            self.adaptive_threshold_offset = (self.adaptive_threshold_offset + bump).min(25.0);
        }
        self.last_update = Instant::now();
    }

    fn rolling_pnl_percent(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        self.recent_trades.iter().map(|t| t.pnl_percent).sum::<f64>()
            / self.recent_trades.len() as f64
    }

    /// Position-size multiplier from §4.4, clamped to `[0.2, 1.2]`.
    fn position_size_multiplier(&self) -> f64 {
        let mut mult = 1.0_f64;
        if self.loss_streak >= 4 {
            mult *= 0.3;
        } else if self.loss_streak >= 3 {
            mult *= 0.5;
        } else if self.loss_streak >= 2 {
            mult *= 0.7;
        }
        if self.win_streak >= 5 {
            mult *= 1.15;
        } else if self.win_streak >= 3 {
            mult *= 1.10;
        }
        let rolling = self.rolling_pnl_percent();
        if rolling < -15.0 {
            mult *= 0.6;
        } else if rolling < -8.0 {
            mult *= 0.8;
        }
        mult.clamp(0.2, 1.2)
    }
}

/// Base `(minConviction, minSignal, minMomentum)` per strategy (§4.4).
fn base_thresholds(strategy: Strategy) -> (f64, f64, f64) {
    match strategy {
        Strategy::Conservative => (55.0, 60.0, 55.0),
        Strategy::Balanced => (42.0, 55.0, 50.0),
        Strategy::Aggressive => (35.0, 50.0, 45.0),
        Strategy::Degen => (25.0, 45.0, 40.0),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveEntryThresholds {
    pub min_conviction: f64,
    pub min_signal_score: f64,
    pub min_momentum: f64,
    pub position_size_multiplier: f64,
}

/// Owns every agent's `PerAgentTracker`, `Cooldown`, and `RecentLoss` set.
pub struct AgentPerformanceTracker {
    trackers: RwLock<HashMap<String, PerAgentTracker>>,
    cooldowns: RwLock<HashMap<String, Cooldown>>,
    recent_losses: RwLock<HashMap<String, Vec<(String, Instant)>>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cooldown {
    pub cycles_remaining: u32,
    pub reduced_sizing: bool,
}

impl Default for AgentPerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentPerformanceTracker {
    pub fn new() -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(HashMap::new()),
            recent_losses: RwLock::new(HashMap::new()),
        }
    }

    /// On trade exit: append to the rolling window, update streaks and the
    /// adaptive threshold offset (§4.4), and arm a cooldown / record a
    /// recent loss on the token when the exit was a loss.
    pub fn record_trade_exit(&self, agent_id: &str, token_symbol: &str, pnl_percent: f64) {
        let loss_streak = {
            let mut guard = self.trackers.write();
            let tracker = guard.entry(agent_id.to_string()).or_default();
            tracker.record_exit(pnl_percent);
            tracker.loss_streak
        };

        if pnl_percent < 0.0 {
            self.track_loss(agent_id, token_symbol);
            if loss_streak >= 3 {
                let mut guard = self.cooldowns.write();
                let cooldown = guard.entry(agent_id.to_string()).or_default();
                cooldown.cycles_remaining = cooldown.cycles_remaining.max(3);
                cooldown.reduced_sizing = true;
            }
        }
    }

    pub fn track_loss(&self, agent_id: &str, token_symbol: &str) {
        let mut guard = self.recent_losses.write();
        let losses = guard.entry(agent_id.to_string()).or_default();
        let now = Instant::now();
        losses.retain(|(_, at)| now.duration_since(*at) <= ROLLING_WINDOW);
        losses.push((token_symbol.to_ascii_uppercase(), now));
        if losses.len() > MAX_RECENT_LOSSES {
            let excess = losses.len() - MAX_RECENT_LOSSES;
            losses.drain(0..excess);
        }
    }

    pub fn recently_lost_on(&self, agent_id: &str, token_symbol: &str) -> bool {
        let symbol = token_symbol.to_ascii_uppercase();
        self.recent_losses
            .read()
            .get(agent_id)
            .map(|losses| losses.iter().any(|(s, _)| s == &symbol))
            .unwrap_or(false)
    }

    /// Decrements and returns whether the agent is currently on cooldown.
    /// A cooldown in effect blocks the cycle and ticks the counter down
    /// (§4.7 step 10, scenario 5).
    pub fn tick_cooldown(&self, agent_id: &str) -> bool {
        let mut guard = self.cooldowns.write();
        let Some(cooldown) = guard.get_mut(agent_id) else { return false };
        if cooldown.cycles_remaining == 0 {
            return false;
        }
        cooldown.cycles_remaining -= 1;
        true
    }

    /// `getAdaptiveEntryThresholds(agent, strategy)` (§4.4).
    pub fn adaptive_entry_thresholds(&self, agent_id: &str, strategy: Strategy) -> AdaptiveEntryThresholds {
        let (base_conv, base_sig, base_mom) = base_thresholds(strategy);
        let guard = self.trackers.read();
        let tracker = guard.get(agent_id);

        let offset = tracker.map(|t| t.adaptive_threshold_offset).unwrap_or(0.0);
        let mult = tracker.map(|t| t.position_size_multiplier()).unwrap_or(1.0);

        AdaptiveEntryThresholds {
            min_conviction: (base_conv + offset).min(90.0),
            min_signal_score: (base_sig + offset).min(90.0),
            min_momentum: (base_mom + (offset / 2.0).floor()).min(85.0),
            position_size_multiplier: mult,
        }
    }

    pub fn loss_streak(&self, agent_id: &str) -> u32 {
        self.trackers.read().get(agent_id).map(|t| t.loss_streak).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_rise_monotonically_after_losses() {
        let tracker = AgentPerformanceTracker::new();
        let before = tracker.adaptive_entry_thresholds("agent-1", Strategy::Balanced);
        tracker.record_trade_exit("agent-1", "FOO", -10.0);
        tracker.record_trade_exit("agent-1", "FOO", -10.0);
        let after = tracker.adaptive_entry_thresholds("agent-1", Strategy::Balanced);
        assert!(after.min_conviction >= before.min_conviction);
        assert!(after.min_signal_score >= before.min_signal_score);
    }

    #[test]
    fn win_streak_lowers_offset_but_not_below_floor() {
        let tracker = AgentPerformanceTracker::new();
        for _ in 0..10 {
            tracker.record_trade_exit("agent-2", "FOO", 5.0);
        }
        let thresholds = tracker.adaptive_entry_thresholds("agent-2", Strategy::Balanced);
        // floor is base - 10
        assert!(thresholds.min_conviction >= 42.0 - 10.0);
    }

    #[test]
    fn recent_loss_is_tracked_uppercase() {
        let tracker = AgentPerformanceTracker::new();
        tracker.record_trade_exit("agent-3", "foo", -5.0);
        assert!(tracker.recently_lost_on("agent-3", "FOO"));
    }

    #[test]
    fn cooldown_arms_after_three_consecutive_losses() {
        let tracker = AgentPerformanceTracker::new();
        tracker.record_trade_exit("agent-4", "A", -1.0);
        tracker.record_trade_exit("agent-4", "B", -1.0);
        tracker.record_trade_exit("agent-4", "C", -1.0);
        assert!(tracker.tick_cooldown("agent-4"));
    }

    #[test]
    fn position_size_multiplier_clamped() {
        let tracker = AgentPerformanceTracker::new();
        for _ in 0..6 {
            tracker.record_trade_exit("agent-5", "A", -20.0);
        }
        let thresholds = tracker.adaptive_entry_thresholds("agent-5", Strategy::Degen);
        assert!(thresholds.position_size_multiplier >= 0.2);
    }
}
