// =============================================================================
// Signal Fusion & Agent Decision Engine — Main Entry Point
// =============================================================================
//
// Builds every port the Agent Runner needs (§6), loads the Adaptive
// Learning Store from persistence (§4.3), and starts the periodic cycle
// (§4.7). `start`/`stop` is idempotent per §6's CLI/process-lifecycle
// surface; this binary just demonstrates driving it until Ctrl+C.
// =============================================================================

mod adaptive_learning;
mod agent_runner;
mod agent_tracker;
mod config;
mod entities;
mod error;
mod indicators;
mod market;
mod oracle;
mod ports_live;
mod persistence;
mod position_manager;
mod signal_builder;
mod strategy_prompts;
mod ttl_cache;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::agent_runner::AgentRunner;
use crate::agent_tracker::AgentPerformanceTracker;
use crate::adaptive_learning::AdaptiveLearningStore;
use crate::config::EngineConfig;
use crate::indicators::TechnicalIndicatorEngine;
use crate::persistence::{NullBroadcast, PersistencePort};
use crate::ports_live::{
    ChatCompletionOracle, DexScreenerSource, InMemoryPersistence, NeutralFearGreedSource,
    NeutralLiquiditySource, NeutralNewsSource, NeutralSmartMoneySource, NeutralSocialSource,
};
use crate::signal_builder::SignalBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("signal fusion & agent decision engine starting");

    // ── 1. Configuration ──────────────────────────────────────────────────
    let config = EngineConfig::load("engine_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });

    // ── 2. Data-source ports ──────────────────────────────────────────────
    // Only the pair/OHLCV source and the decision oracle have a real
    // reqwest-backed implementation here; the remaining sources
    // (smart-money, social, news, fear/greed, liquidity) are out of scope
    // per spec §1 and stand in with neutral defaults until a real
    // deployment wires in LunarCrush/CryptoPanic/Alternative.me/etc.
    let dexscreener = Arc::new(DexScreenerSource::new());

    let indicators = Arc::new(TechnicalIndicatorEngine::new(
        config.bar_history_max,
        Duration::from_millis(config.indicator_cache_ttl_ms),
    ));

    let signal_builder = Arc::new(
        SignalBuilder::new(
            indicators,
            dexscreener.clone(),
            Arc::new(NeutralSmartMoneySource),
            Arc::new(NeutralSocialSource),
            Arc::new(NeutralNewsSource),
            Arc::new(NeutralFearGreedSource),
            Arc::new(NeutralLiquiditySource),
        )
        .with_ohlcv_source(dexscreener.clone()),
    );

    // ── 3. Decision oracle ────────────────────────────────────────────────
    let oracle_base_url = std::env::var("ORACLE_BASE_URL")
        .unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string());
    let oracle_api_key = std::env::var("ORACLE_API_KEY").unwrap_or_default();
    let oracle_model = std::env::var("ORACLE_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string());
    let oracle = Arc::new(ChatCompletionOracle::new(oracle_base_url, oracle_api_key, oracle_model));

    // ── 4. Persistence + broadcast ────────────────────────────────────────
    let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
    let broadcast = Arc::new(NullBroadcast);

    // ── 5. Adaptive Learning Store — rebuilt from persistence at startup ──
    let learning_store = Arc::new(AdaptiveLearningStore::load(&persistence).await);

    // ── 6. Agent Performance Tracker ──────────────────────────────────────
    let tracker = Arc::new(AgentPerformanceTracker::new());

    // ── 7. Agent Runner ────────────────────────────────────────────────────
    let runner = AgentRunner::new(
        config,
        signal_builder,
        persistence,
        broadcast,
        oracle,
        learning_store,
        tracker,
    );

    runner.start().await;
    info!("agent runner started — cycling every configured period. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");
    runner.stop().await;

    info!("engine shut down complete");
    Ok(())
}
