// =============================================================================
// Engine configuration — hot-reloadable cycle and threshold settings
// =============================================================================
//
// Every tunable the core recognizes lives here; no other configuration
// surface exists (§6). Persistence uses the same atomic tmp + rename
// pattern as the rest of this codebase's config handling, and every field
// carries a serde default so an older config file never fails to load
// after a field is added.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_cycle_period_ms() -> u64 {
    10_000
}

fn default_signal_cache_ttl_ms() -> u64 {
    8_000
}

fn default_indicator_cache_ttl_ms() -> u64 {
    45_000
}

fn default_bar_history_max() -> usize {
    200
}

fn default_stop_loss_pct() -> f64 {
    10.0
}

fn default_take_profit_pct() -> f64 {
    25.0
}

/// Top-level engine configuration. Every field has a serde default so that
/// older JSON config files missing new fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the Agent Runner fires a cycle.
    #[serde(default = "default_cycle_period_ms")]
    pub cycle_period_ms: u64,

    /// TTL for the per-group prefetched `TokenSignal` cache within a cycle.
    #[serde(default = "default_signal_cache_ttl_ms")]
    pub signal_cache_ttl_ms: u64,

    /// TTL for the derived-indicators cache in the Technical Indicator
    /// Engine.
    #[serde(default = "default_indicator_cache_ttl_ms")]
    pub indicator_cache_ttl_ms: u64,

    /// Hard cap on the number of `PriceBar`s retained per token.
    #[serde(default = "default_bar_history_max")]
    pub bar_history_max: usize,

    /// Fallback stop-loss percent used only when a strategy-derived value
    /// is unavailable (e.g. constructing a position outside a cycle).
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: f64,

    /// Fallback take-profit percent, see above.
    #[serde(default = "default_take_profit_pct")]
    pub default_take_profit_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: default_cycle_period_ms(),
            signal_cache_ttl_ms: default_signal_cache_ttl_ms(),
            indicator_cache_ttl_ms: default_indicator_cache_ttl_ms(),
            bar_history_max: default_bar_history_max(),
            default_stop_loss_pct: default_stop_loss_pct(),
            default_take_profit_pct: default_take_profit_pct(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            cycle_period_ms = config.cycle_period_ms,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename), so a crash mid-write never corrupts
    /// the file on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.cycle_period_ms, 10_000);
        assert_eq!(cfg.signal_cache_ttl_ms, 8_000);
        assert_eq!(cfg.indicator_cache_ttl_ms, 45_000);
        assert_eq!(cfg.bar_history_max, 200);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.cycle_period_ms, 10_000);
        assert_eq!(cfg.bar_history_max, 200);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "cycle_period_ms": 5000 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.cycle_period_ms, 5000);
        assert_eq!(cfg.bar_history_max, 200);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.cycle_period_ms, cfg2.cycle_period_ms);
        assert_eq!(cfg.bar_history_max, cfg2.bar_history_max);
    }
}
