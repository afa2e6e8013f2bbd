// =============================================================================
// Adaptive Learning Store (§4.3)
// =============================================================================
//
// Per-signal and per-signal-combination win/loss outcome tracking. Loaded
// once per process from the persistence port; reads are lock-free over a
// snapshot, writes serialized per `(signal, strategy)` key — backed by
// `parking_lot::RwLock<HashMap<...>>` matching the teacher's
// `signals/signal_decay.rs` shape.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::entities::{combo_key, SignalPerformance};
use crate::persistence::PersistencePort;
use crate::types::Strategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceStats {
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub count: u32,
    pub avg_pnl: f64,
}

impl PerformanceStats {
    fn record(&mut self, pnl_percent: f64, profitable: bool) {
        if profitable {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.count += 1;
        self.total_pnl += pnl_percent;
        self.avg_pnl = ((self.avg_pnl * (self.count - 1) as f64) + pnl_percent) / self.count as f64;
    }

    pub fn win_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.wins as f64 / self.count as f64
    }
}

type Key = (String, Strategy);

/// Confidence multiplier plus blacklist verdict for a signal combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComboConfidence {
    pub multiplier: f64,
    pub blacklisted: bool,
}

pub struct AdaptiveLearningStore {
    signals: RwLock<HashMap<Key, PerformanceStats>>,
    combos: RwLock<HashMap<Key, PerformanceStats>>,
}

impl AdaptiveLearningStore {
    pub fn empty() -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            combos: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds the in-memory maps from persistence at startup.
    pub async fn load(persistence: &Arc<dyn PersistencePort>) -> Self {
        let store = Self::empty();
        match persistence.get_all_signal_performance().await {
            Ok(rows) => store.ingest(rows),
            Err(e) => warn!(error = %e, "failed to load adaptive learning state, starting empty"),
        }
        info!(
            signals = store.signals.read().len(),
            combos = store.combos.read().len(),
            "adaptive learning store loaded"
        );
        store
    }

    fn ingest(&self, rows: Vec<SignalPerformance>) {
        for row in rows {
            let stats = PerformanceStats {
                wins: row.wins,
                losses: row.losses,
                total_pnl: row.total_pnl,
                count: row.count,
                avg_pnl: row.avg_pnl,
            };
            let key = (row.signal.clone(), row.strategy);
            if row.signal.starts_with("COMBO:") {
                self.combos.write().insert(key, stats);
            } else {
                self.signals.write().insert(key, stats);
            }
        }
    }

    /// `recordTradeExit(signalsAtEntry, strategy, entry, exit)` (§4.3).
    /// Upserts every signal tag present at entry, plus the combo key for
    /// the sorted set, and persists each row.
    pub async fn record_trade_exit(
        &self,
        signals_at_entry: &[String],
        strategy: Strategy,
        entry_price: f64,
        exit_price: f64,
        persistence: &Arc<dyn PersistencePort>,
    ) {
        if entry_price == 0.0 {
            return;
        }
        let pnl_percent = (exit_price - entry_price) / entry_price * 100.0;
        let profitable = pnl_percent > 0.0;

        for signal in signals_at_entry {
            let key = (signal.clone(), strategy);
            self.signals.write().entry(key).or_default().record(pnl_percent, profitable);
            if let Err(e) = persistence
                .upsert_signal_performance(signal, strategy, profitable, pnl_percent)
                .await
            {
                warn!(error = %e, signal, "failed to persist signal performance");
            }
        }

        if !signals_at_entry.is_empty() {
            let combo = combo_key(signals_at_entry);
            let key = (combo.clone(), strategy);
            self.combos.write().entry(key).or_default().record(pnl_percent, profitable);
            if let Err(e) = persistence
                .upsert_signal_performance(&combo, strategy, profitable, pnl_percent)
                .await
            {
                warn!(error = %e, combo = %combo, "failed to persist combo performance");
            }
        }
    }

    /// `getSignalConfidenceMultiplier(signal)` (§4.3).
    pub fn signal_confidence_multiplier(&self, signal: &str, strategy: Strategy) -> f64 {
        let stats = self.signals.read().get(&(signal.to_string(), strategy)).copied();
        let Some(stats) = stats else { return 1.0 };
        if stats.count < 3 {
            return 1.0;
        }
        let wr = stats.win_rate();
        if wr >= 0.75 {
            1.4
        } else if wr >= 0.60 {
            1.2
        } else if wr >= 0.50 {
            1.05
        } else if wr >= 0.40 {
            0.85
        } else if wr >= 0.30 {
            0.6
        } else {
            0.3
        }
    }

    /// `isSignalBlacklisted(signal)` (§4.3).
    pub fn is_signal_blacklisted(&self, signal: &str, strategy: Strategy) -> bool {
        let Some(stats) = self.signals.read().get(&(signal.to_string(), strategy)).copied() else {
            return false;
        };
        stats.count >= 5 && stats.win_rate() < 0.25 && stats.avg_pnl < -3.0
    }

    /// `getComboConfidence(signals)` (§4.3).
    pub fn combo_confidence(&self, signals: &[String], strategy: Strategy) -> ComboConfidence {
        if signals.is_empty() {
            return ComboConfidence { multiplier: 1.0, blacklisted: false };
        }
        let combo = combo_key(signals);
        let Some(stats) = self.combos.read().get(&(combo, strategy)).copied() else {
            return ComboConfidence { multiplier: 1.0, blacklisted: false };
        };
        if stats.count < 3 {
            return ComboConfidence { multiplier: 1.0, blacklisted: false };
        }
        let wr = stats.win_rate();
        if wr < 0.20 && stats.count >= 5 {
            return ComboConfidence { multiplier: 0.0, blacklisted: true };
        }
        let multiplier = if wr >= 0.70 {
            1.5
        } else if wr >= 0.55 {
            1.2
        } else if wr < 0.35 {
            0.5
        } else {
            1.0
        };
        ComboConfidence { multiplier, blacklisted: false }
    }

    /// `computeAdaptiveConvictionBoost(signals)` (§4.3): arithmetic mean of
    /// `(mult-1)*15` over non-combo signals with a non-1.0 multiplier.
    pub fn adaptive_conviction_boost(&self, signals: &[String], strategy: Strategy) -> f64 {
        let deltas: Vec<f64> = signals
            .iter()
            .map(|s| self.signal_confidence_multiplier(s, strategy))
            .filter(|m| (*m - 1.0).abs() > f64::EPSILON)
            .map(|m| (m - 1.0) * 15.0)
            .collect();
        if deltas.is_empty() {
            return 0.0;
        }
        (deltas.iter().sum::<f64>() / deltas.len() as f64).round()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_with_win_rate(signal: &str, strategy: Strategy, wins: u32, losses: u32, avg_pnl: f64) -> SignalPerformance {
        SignalPerformance {
            signal: signal.to_string(),
            strategy,
            wins,
            losses,
            total_pnl: avg_pnl * (wins + losses) as f64,
            count: wins + losses,
            avg_pnl,
        }
    }

    #[test]
    fn confidence_multiplier_defaults_to_one_below_min_count() {
        let store = AdaptiveLearningStore::empty();
        store.ingest(vec![rows_with_win_rate("UPTREND", Strategy::Balanced, 2, 0, 5.0)]);
        assert_eq!(store.signal_confidence_multiplier("UPTREND", Strategy::Balanced), 1.0);
    }

    #[test]
    fn confidence_multiplier_ladder() {
        let store = AdaptiveLearningStore::empty();
        store.ingest(vec![rows_with_win_rate("UPTREND", Strategy::Balanced, 8, 2, 5.0)]);
        assert_eq!(store.signal_confidence_multiplier("UPTREND", Strategy::Balanced), 1.4);
    }

    #[test]
    fn blacklist_requires_enough_samples_and_poor_performance() {
        let store = AdaptiveLearningStore::empty();
        store.ingest(vec![rows_with_win_rate("RUG_FLAG", Strategy::Degen, 1, 5, -4.0)]);
        assert!(store.is_signal_blacklisted("RUG_FLAG", Strategy::Degen));
    }

    #[test]
    fn combo_confidence_blacklists_low_win_rate_combos() {
        let store = AdaptiveLearningStore::empty();
        let combo = combo_key(&["A".to_string(), "B".to_string()]);
        store.ingest(vec![rows_with_win_rate(&combo, Strategy::Aggressive, 1, 6, -2.0)]);
        let result = store.combo_confidence(&["B".to_string(), "A".to_string()], Strategy::Aggressive);
        assert!(result.blacklisted);
    }

    #[test]
    fn adaptive_threshold_monotonicity_after_loss() {
        // After a losing trade, the confidence multiplier for a signal
        // cannot improve relative to a neutral baseline (§8 law, mirrored
        // here at the store level rather than the tracker level).
        let store = AdaptiveLearningStore::empty();
        store.ingest(vec![rows_with_win_rate("DOWNTREND", Strategy::Conservative, 1, 9, -6.0)]);
        assert!(store.signal_confidence_multiplier("DOWNTREND", Strategy::Conservative) < 1.0);
    }
}
