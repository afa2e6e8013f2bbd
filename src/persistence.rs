// =============================================================================
// Persistence port (§6) and broadcast port
// =============================================================================
//
// The core never owns storage; it only invokes these operations. Mirrors
// the teacher's split between a typed client trait and fire-and-forget
// telemetry sinks (`AppState::push_decision`), generalized to an
// `async_trait` object-safe boundary so a real backend (Postgres, etc.)
// can be swapped in without the engine knowing about it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{AgentConfig, AgentLog, AgentPosition, AgentTrade, SignalPerformance};
use crate::error::EngineResult;
use crate::types::Strategy;

#[async_trait]
pub trait PersistencePort: Send + Sync {
    // --- Agents ----------------------------------------------------------
    async fn list_active_agents(&self) -> EngineResult<Vec<AgentConfig>>;
    async fn get_agent(&self, id: &str) -> EngineResult<Option<AgentConfig>>;
    async fn update_agent(&self, agent: &AgentConfig) -> EngineResult<()>;

    // --- Positions ---------------------------------------------------------
    async fn list_open_positions_by_agent(&self, agent_id: &str)
        -> EngineResult<Vec<AgentPosition>>;
    async fn get_position(&self, id: &str) -> EngineResult<Option<AgentPosition>>;
    async fn create_position(&self, position: &AgentPosition) -> EngineResult<()>;
    async fn update_position(&self, position: &AgentPosition) -> EngineResult<()>;
    async fn close_agent_position(
        &self,
        id: &str,
        exit_price: f64,
        realized_pnl: f64,
    ) -> EngineResult<()>;

    // --- Trades & logs -----------------------------------------------------
    async fn create_agent_trade(&self, trade: &AgentTrade) -> EngineResult<()>;
    async fn create_agent_log(&self, log: &AgentLog) -> EngineResult<()>;
    async fn get_agent_trades(&self, agent_id: &str, limit: usize) -> EngineResult<Vec<AgentTrade>>;

    // --- Signal performance --------------------------------------------------
    async fn get_all_signal_performance(&self) -> EngineResult<Vec<SignalPerformance>>;
    async fn upsert_signal_performance(
        &self,
        signal: &str,
        strategy: Strategy,
        won: bool,
        pnl_percent: f64,
    ) -> EngineResult<()>;

    // --- Access control -------------------------------------------------------
    async fn has_active_promo_access(&self, user_id: &str) -> EngineResult<bool>;
    async fn get_user_active_subscription(&self, user_id: &str) -> EngineResult<bool>;
    async fn get_user_subscription_including_grace(&self, user_id: &str) -> EngineResult<bool>;
    async fn wallet_to_user(&self, wallet_address: &str) -> EngineResult<Option<String>>;
}

// -----------------------------------------------------------------------
// Broadcast port
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastEventKind {
    AgentUpdate,
    AgentTrade,
    AgentError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub kind: BroadcastEventKind,
    pub data: serde_json::Value,
}

impl BroadcastEvent {
    pub fn agent_update(data: serde_json::Value) -> Self {
        Self { kind: BroadcastEventKind::AgentUpdate, data }
    }
    pub fn agent_trade(data: serde_json::Value) -> Self {
        Self { kind: BroadcastEventKind::AgentTrade, data }
    }
    pub fn agent_error(data: serde_json::Value) -> Self {
        Self { kind: BroadcastEventKind::AgentError, data }
    }
}

/// Fire-and-forget; no acknowledgement, never `async` (§6, matching the
/// teacher's synchronous telemetry sinks which never await).
pub trait BroadcastPort: Send + Sync {
    fn emit(&self, event: BroadcastEvent);
}

/// No-op sink used when nothing downstream subscribes; also handy in tests.
pub struct NullBroadcast;

impl BroadcastPort for NullBroadcast {
    fn emit(&self, _event: BroadcastEvent) {}
}
